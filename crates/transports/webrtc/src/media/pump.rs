//! Drives a [`StreamHandler`] against a connection's decoded audio I/O
//! (§4.3), grounded in `server_peer.rs`'s `tokio::select! { biased; ... }`
//! shutdown/input/output loop. Opus decode/encode sits below this boundary
//! in the media stack (the same boundary `tracks.py`'s `recv()` sits
//! below, which already hands `StreamHandler` decoded `av.AudioFrame`s),
//! so this module operates purely on [`AudioFrame`] values.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fastrtc_core::handler::{HandlerReadiness, StreamHandler};
use fastrtc_core::output_queue::OutputSender;
use fastrtc_core::types::{AudioFrame, ControlMessage, ControlSink, Layout};
use fastrtc_core::output_framer::OutputFramer;

use crate::media::pacing::PacingClock;

/// Source of decoded inbound audio frames for one session.
pub type AudioSource = mpsc::Receiver<AudioFrame>;

/// Sink for decoded outbound audio frames, paced to real time by the
/// caller using [`PacingClock`].
pub type AudioSink = mpsc::Sender<AudioFrame>;

/// Rate and frame size every outbound audio frame is normalized to before
/// it reaches the RTP track (§4.3 steps 1-4), matching the clock rate the
/// track's `audio/L16` capability advertises.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
pub const OUTPUT_LAYOUT: Layout = Layout::Stereo;
/// 20ms at [`OUTPUT_SAMPLE_RATE`], one RTP packet's worth of audio.
pub const OUTPUT_FRAME_SIZE: usize = 480;

/// Runs the receive/emit loop for one session until `cancel` fires or the
/// inbound track ends. `emit` is polled continuously but backs off briefly
/// when the handler reports nothing to send, so an idle handler does not
/// spin the task.
pub async fn drive_audio(
    mut handler: Box<dyn StreamHandler>,
    mut source: AudioSource,
    sink: AudioSink,
    output_tx: OutputSender,
    control_tx: ControlSink,
    readiness: Arc<HandlerReadiness>,
    cancel: CancellationToken,
) {
    handler.set_control_sink(control_tx.clone());
    handler.set_readiness(readiness);

    let mut pacing = PacingClock::new();
    let mut framer = OutputFramer::new(OUTPUT_SAMPLE_RATE, OUTPUT_LAYOUT, OUTPUT_FRAME_SIZE);
    let emit_timeout = handler.emit_timeout();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!("audio pump cancelled");
                break;
            }

            frame = source.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = handler.receive(frame).await {
                            tracing::warn!(error = %e, "handler receive failed");
                        }
                    }
                    None => {
                        tracing::debug!("inbound audio track ended");
                        break;
                    }
                }
            }

            emitted = tokio::time::timeout(emit_timeout, handler.emit()) => {
                match emitted {
                    Ok(Ok(emit_type)) => {
                        let (media, outputs) = emit_type.split();
                        if let Some(frame) = media {
                            match framer.process(&frame) {
                                Ok(chunks) => {
                                    let mut sink_closed = false;
                                    for chunk in chunks {
                                        let data_time = Duration::from_secs_f64(chunk.pts as f64 / OUTPUT_SAMPLE_RATE as f64);
                                        let frame_duration = Duration::from_secs_f64(chunk.duration_secs());
                                        let wait = pacing.wait_for(data_time, frame_duration);
                                        if !wait.is_zero() {
                                            tokio::time::sleep(wait).await;
                                        }
                                        if sink.send(chunk).await.is_err() {
                                            sink_closed = true;
                                            break;
                                        }
                                    }
                                    if sink_closed {
                                        tracing::debug!("outbound audio sink closed");
                                        break;
                                    }
                                }
                                Err(e) => tracing::warn!(error = %e, "output resampling failed"),
                            }
                        } else {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                        if let Some(outputs) = outputs {
                            output_tx.push(outputs);
                            let _ = control_tx.send(ControlMessage::fetch_output());
                        }
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "handler emit failed");
                    }
                    Err(_) => {
                        tracing::warn!("handler emit exceeded its watchdog deadline");
                    }
                }
            }
        }
    }

    handler.shutdown().await;
}
