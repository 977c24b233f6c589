//! Capture loop.
//!
//! One dedicated thread grabs frames at a fixed cadence and appends them
//! to the shared ring buffer. The loop owns its error policy: transient
//! failures are retried a bounded number of times, fatal failures and
//! sustained blank output fault the loop. Nothing here blocks on export;
//! exports read the buffer through snapshots.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;

use crate::buffer::RingBuffer;
use crate::capture::source::FrameSource;
use crate::capture::types::Frame;
use crate::error::CaptureError;
use crate::state::RecorderEvent;

/// Consecutive transient failures tolerated before the loop faults.
const MAX_CONSECUTIVE_ERRORS: u32 = 10;
/// Consecutive all-black frames before the loop assumes screen-recording
/// permission was revoked.
const BLANK_FRAME_THRESHOLD: u32 = 10;
/// Pause after a transient failure before retrying.
const ERROR_RETRY_DELAY: Duration = Duration::from_millis(500);
/// How long `stop` waits for the thread before detaching it.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of the capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Not capturing; either never started or cleanly stopped.
    Idle,
    /// The loop is running and appending frames.
    Capturing,
    /// The loop stopped itself after an unrecoverable failure.
    Faulted,
}

impl CaptureState {
    fn as_u8(self) -> u8 {
        match self {
            CaptureState::Idle => 0,
            CaptureState::Capturing => 1,
            CaptureState::Faulted => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => CaptureState::Capturing,
            2 => CaptureState::Faulted,
            _ => CaptureState::Idle,
        }
    }
}

/// Handle to a running capture thread.
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Spawn the capture loop.
    ///
    /// `open` runs on the capture thread itself so sources that are not
    /// `Send` (platform capture contexts often aren't) can be used. If it
    /// fails the loop faults immediately and an error event is emitted.
    pub fn spawn<S, F>(
        open: F,
        fps: u32,
        buffer: Arc<RingBuffer<Frame>>,
        events: UnboundedSender<RecorderEvent>,
    ) -> Self
    where
        S: FrameSource + 'static,
        F: FnOnce() -> Result<S, CaptureError> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AtomicU8::new(CaptureState::Capturing.as_u8()));

        let thread = {
            let stop = Arc::clone(&stop);
            let state = Arc::clone(&state);
            std::thread::spawn(move || {
                let source = match open() {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to open frame source");
                        state.store(CaptureState::Faulted.as_u8(), Ordering::SeqCst);
                        let _ = events.send(RecorderEvent::Error(e.to_string()));
                        return;
                    }
                };
                run_loop(source, fps, buffer, stop, state, events);
            })
        };

        Self {
            stop,
            state,
            thread: Some(thread),
        }
    }

    /// Current loop state.
    pub fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Signal the loop to stop and wait (bounded) for the thread to exit.
    ///
    /// If the thread does not finish within the timeout it is detached
    /// with a warning rather than blocking the caller forever.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                tracing::warn!("capture thread did not stop in time, detaching");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        // Signal only; a blocking join in drop could stall the caller.
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn run_loop<S: FrameSource>(
    mut source: S,
    fps: u32,
    buffer: Arc<RingBuffer<Frame>>,
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    events: UnboundedSender<RecorderEvent>,
) {
    let interval = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
    let mut consecutive_errors = 0u32;
    let mut blank_streak = 0u32;
    let mut next_frame_time = Instant::now() + interval;

    tracing::info!(fps, capacity = buffer.capacity(), "capture loop started");

    let fault = loop {
        if stop.load(Ordering::SeqCst) {
            break None;
        }

        match source.capture_frame() {
            Ok(frame) => {
                consecutive_errors = 0;

                if frame.is_blank() {
                    blank_streak += 1;
                    if blank_streak >= BLANK_FRAME_THRESHOLD {
                        break Some(CaptureError::PermissionLost(format!(
                            "{blank_streak} consecutive blank frames"
                        )));
                    }
                } else {
                    blank_streak = 0;
                }

                buffer.push(frame);
            }
            Err(CaptureError::Transient(msg)) => {
                consecutive_errors += 1;
                tracing::warn!(
                    attempt = consecutive_errors,
                    "transient capture failure: {msg}"
                );
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    break Some(CaptureError::Fatal(format!(
                        "{consecutive_errors} consecutive capture failures, last: {msg}"
                    )));
                }
                std::thread::sleep(ERROR_RETRY_DELAY);
                next_frame_time = Instant::now() + interval;
                continue;
            }
            Err(e) => break Some(e),
        }

        // Hold the cadence. When a grab overruns the interval, resync
        // instead of bursting frames to catch up.
        let now = Instant::now();
        if next_frame_time > now {
            std::thread::sleep(next_frame_time - now);
            next_frame_time += interval;
        } else {
            next_frame_time = now + interval;
        }
    };

    match fault {
        Some(e) => {
            tracing::error!(error = %e, "capture loop faulted");
            state.store(CaptureState::Faulted.as_u8(), Ordering::SeqCst);
            let _ = events.send(RecorderEvent::Error(e.to_string()));
        }
        None => {
            tracing::info!("capture loop stopped");
            state.store(CaptureState::Idle.as_u8(), Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSource {
        next: u8,
    }

    impl FrameSource for CountingSource {
        fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
            let value = self.next;
            self.next = self.next.wrapping_add(1).max(1);
            Ok(Frame {
                width: 2,
                height: 2,
                data: vec![value; 12],
                captured_at: Instant::now(),
            })
        }
    }

    struct FailingSource;

    impl FrameSource for FailingSource {
        fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
            Err(CaptureError::Fatal("device unplugged".into()))
        }
    }

    struct BlankSource;

    impl FrameSource for BlankSource {
        fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
            Ok(Frame {
                width: 2,
                height: 2,
                data: vec![0; 12],
                captured_at: Instant::now(),
            })
        }
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn frames_arrive_in_capture_order() {
        let buffer = Arc::new(RingBuffer::new(64));
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = CaptureHandle::spawn(
            || Ok(CountingSource { next: 1 }),
            200,
            Arc::clone(&buffer),
            tx,
        );
        wait_for(|| buffer.len() >= 5);
        handle.stop();

        let frames = buffer.snapshot_all();
        let values: Vec<u8> = frames.iter().map(|f| f.data[0]).collect();
        assert!(values.windows(2).all(|w| w[1] > w[0] || w[1] == 1));
    }

    #[test]
    fn stop_transitions_to_idle() {
        let buffer = Arc::new(RingBuffer::new(16));
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = CaptureHandle::spawn(
            || Ok(CountingSource { next: 1 }),
            200,
            Arc::clone(&buffer),
            tx,
        );
        assert_eq!(handle.state(), CaptureState::Capturing);
        let state = Arc::clone(&handle.state);
        handle.stop();
        assert_eq!(
            CaptureState::from_u8(state.load(Ordering::SeqCst)),
            CaptureState::Idle
        );
    }

    #[test]
    fn fatal_error_faults_the_loop() {
        let buffer = Arc::new(RingBuffer::new(16));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = CaptureHandle::spawn(|| Ok(FailingSource), 200, buffer, tx);
        wait_for(|| handle.state() == CaptureState::Faulted);
        let event = rx.blocking_recv().unwrap();
        match event {
            RecorderEvent::Error(msg) => assert!(msg.contains("device unplugged")),
            other => panic!("unexpected event: {other:?}"),
        }
        handle.stop();
    }

    #[test]
    fn sustained_blank_frames_classified_as_permission_loss() {
        let buffer = Arc::new(RingBuffer::new(32));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = CaptureHandle::spawn(|| Ok(BlankSource), 500, buffer, tx);
        wait_for(|| handle.state() == CaptureState::Faulted);
        match rx.blocking_recv().unwrap() {
            RecorderEvent::Error(msg) => assert!(msg.contains("permission lost")),
            other => panic!("unexpected event: {other:?}"),
        }
        handle.stop();
    }

    #[test]
    fn failed_open_faults_immediately() {
        let buffer = Arc::new(RingBuffer::new(8));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = CaptureHandle::spawn(
            || Err::<CountingSource, _>(CaptureError::Fatal("no monitors".into())),
            30,
            buffer,
            tx,
        );
        wait_for(|| handle.state() == CaptureState::Faulted);
        assert!(matches!(rx.blocking_recv(), Some(RecorderEvent::Error(_))));
        handle.stop();
    }
}
