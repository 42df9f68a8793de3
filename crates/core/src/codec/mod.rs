pub mod mulaw;
