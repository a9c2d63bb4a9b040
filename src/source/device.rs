//! YUYV capture source.
//!
//! Reads packed YUYV 4:2:2 frames (`width * height * 2` bytes each) from a
//! capture device node or a raw capture file. The device is expected to be
//! configured for that format and resolution already; format negotiation
//! with the driver is not done here.
//!
//! Reads happen on a background thread so a capture can be bounded by a
//! timeout even though the read itself blocks.

use crate::core::error::{CaptureError, CaptureResult};
use crate::core::types::{Frame, Resolution};
use crate::source::FrameSource;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use rayon::prelude::*;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Frames the reader may run ahead of the consumer.
const READ_AHEAD: usize = 2;

/// How long `close` waits for the reader thread before abandoning it.
const READER_JOIN_TIMEOUT: Duration = Duration::from_millis(250);

const READER_JOIN_POLL: Duration = Duration::from_millis(5);

/// Convert packed YUYV to RGBA8 using integer BT.601 studio-range math.
///
/// Each 4-byte `Y0 U Y1 V` group yields two pixels sharing `U` and `V`.
/// `rgba` must hold twice as many bytes as `yuyv`.
pub fn yuyv_to_rgba(yuyv: &[u8], rgba: &mut [u8]) {
    fn clamp(v: i32) -> u8 {
        v.clamp(0, 255) as u8
    }

    rgba.par_chunks_exact_mut(8)
        .zip(yuyv.par_chunks_exact(4))
        .for_each(|(out, px)| {
            let d = px[1] as i32 - 128;
            let e = px[3] as i32 - 128;
            for (i, luma) in [px[0], px[2]].into_iter().enumerate() {
                let c = 298 * (luma as i32 - 16);
                out[i * 4] = clamp((c + 409 * e + 128) >> 8);
                out[i * 4 + 1] = clamp((c - 100 * d - 208 * e + 128) >> 8);
                out[i * 4 + 2] = clamp((c + 516 * d + 128) >> 8);
                out[i * 4 + 3] = 255;
            }
        });
}

/// Capture source backed by a YUYV device node or file.
pub struct DeviceSource {
    path: PathBuf,
    resolution: Resolution,
    timeout: Duration,
    frames: Option<Receiver<CaptureResult<Frame>>>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    captured: u64,
}

impl DeviceSource {
    /// Open `path` and start reading frames of `resolution`.
    ///
    /// # Errors
    /// [`CaptureError::DeviceUnavailable`] if the path cannot be opened, or
    /// if it is a regular file whose length is not a whole number of frames.
    pub fn open(path: &Path, resolution: Resolution, timeout: Duration) -> CaptureResult<Self> {
        let unavailable = |reason: String| CaptureError::DeviceUnavailable {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::open(path).map_err(|e| unavailable(e.to_string()))?;

        let frame_len = resolution.pixel_count() * 2;
        let metadata = file.metadata().map_err(|e| unavailable(e.to_string()))?;
        if metadata.is_file() && metadata.len() % frame_len as u64 != 0 {
            return Err(unavailable(format!(
                "file length {} is not a multiple of the {resolution} YUYV frame size {frame_len}",
                metadata.len()
            )));
        }

        let (sender, receiver) = channel::bounded(READ_AHEAD);
        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = Arc::clone(&stop);
        let reader = std::thread::Builder::new()
            .name("obscura-capture".to_string())
            .spawn(move || read_loop(file, resolution, reader_stop, sender))?;

        log::debug!("capture reader started for {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            resolution,
            timeout,
            frames: Some(receiver),
            stop,
            reader: Some(reader),
            captured: 0,
        })
    }

    /// Path of the device or file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_loop(
    mut file: File,
    resolution: Resolution,
    stop: Arc<AtomicBool>,
    frames: channel::Sender<CaptureResult<Frame>>,
) {
    let mut yuyv = vec![0u8; resolution.pixel_count() * 2];
    while !stop.load(Ordering::Acquire) {
        let result = match file.read_exact(&mut yuyv) {
            Ok(()) => {
                let mut rgba = vec![0u8; resolution.frame_bytes()];
                yuyv_to_rgba(&yuyv, &mut rgba);
                Ok(Frame::packed(resolution.width, resolution.height, rgba))
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(CaptureError::EndOfStream),
            Err(e) => Err(CaptureError::Io(e)),
        };
        let last = result.is_err();
        if frames.send(result).is_err() || last {
            break;
        }
    }
}

/// Join the reader once it has seen the stop flag. A reader stuck inside a
/// blocking `read` is detached after [`READER_JOIN_TIMEOUT`]; it exits on
/// its own once that read returns.
fn join_reader(reader: JoinHandle<()>, path: &Path) {
    let deadline = Instant::now() + READER_JOIN_TIMEOUT;
    while !reader.is_finished() {
        if Instant::now() >= deadline {
            log::warn!(
                "capture reader for {} still blocked after {:?}, abandoning it",
                path.display(),
                READER_JOIN_TIMEOUT
            );
            return;
        }
        std::thread::sleep(READER_JOIN_POLL);
    }
    if reader.join().is_err() {
        log::warn!("capture reader for {} panicked", path.display());
    }
}

impl FrameSource for DeviceSource {
    fn name(&self) -> &'static str {
        "device"
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn capture_frame(&mut self) -> CaptureResult<Frame> {
        let frames = self.frames.as_ref().ok_or(CaptureError::EndOfStream)?;
        match frames.recv_timeout(self.timeout) {
            Ok(Ok(frame)) => {
                self.captured += 1;
                Ok(frame)
            }
            Ok(Err(err)) => Err(err),
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::CaptureTimeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::EndOfStream),
        }
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        // Dropping the receiver unblocks a reader waiting to send.
        self.frames = None;
        if let Some(reader) = self.reader.take() {
            join_reader(reader, &self.path);
        }
        log::debug!("closed capture source {}", self.path.display());
    }

    fn frames_captured(&self) -> u64 {
        self.captured
    }
}

impl Drop for DeviceSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_yuyv_black_and_white() {
        let yuyv = [16, 128, 235, 128];
        let mut rgba = [0u8; 8];
        yuyv_to_rgba(&yuyv, &mut rgba);
        assert_eq!(rgba, [0, 0, 0, 255, 255, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_clamps_saturated_red() {
        let yuyv = [81, 90, 81, 240];
        let mut rgba = [0u8; 8];
        yuyv_to_rgba(&yuyv, &mut rgba);
        assert_eq!(rgba[0], 255);
        assert!(rgba[1] < 5);
        assert!(rgba[2] < 5);
        assert_eq!(rgba[3], 255);
    }

    fn capture_file(frames: usize, res: Resolution) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let frame: Vec<u8> = [16u8, 128, 235, 128]
            .iter()
            .copied()
            .cycle()
            .take(res.pixel_count() * 2)
            .collect();
        for _ in 0..frames {
            file.write_all(&frame).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_reads_frames_then_end_of_stream() {
        let res = Resolution::new(4, 2);
        let file = capture_file(2, res);
        let mut source = DeviceSource::open(file.path(), res, Duration::from_secs(5)).unwrap();

        let frame = source.capture_frame().unwrap();
        assert!(frame.check_against(res).is_ok());
        assert_eq!(frame.pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(frame.pixel(1, 0), [255, 255, 255, 255]);
        assert!(source.capture_frame().is_ok());
        assert!(matches!(source.capture_frame(), Err(CaptureError::EndOfStream)));
        assert_eq!(source.frames_captured(), 2);
    }

    #[test]
    fn test_rejects_partial_capture_file() {
        let res = Resolution::new(4, 2);
        let mut file = capture_file(1, res);
        file.write_all(&[0, 1, 2]).unwrap();
        let err = DeviceSource::open(file.path(), res, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, CaptureError::DeviceUnavailable { .. }));
    }

    #[test]
    fn test_capture_after_close() {
        let res = Resolution::new(2, 2);
        let file = capture_file(3, res);
        let mut source = DeviceSource::open(file.path(), res, Duration::from_secs(1)).unwrap();
        source.close();
        assert!(matches!(source.capture_frame(), Err(CaptureError::EndOfStream)));
    }

    #[test]
    fn test_close_stops_reader_blocked_on_send() {
        let res = Resolution::new(4, 4);
        let file = capture_file(64, res);
        let mut source = DeviceSource::open(file.path(), res, Duration::from_secs(1)).unwrap();
        assert!(source.capture_frame().is_ok());

        // The reader is parked on the full read-ahead channel.
        let start = Instant::now();
        source.close();
        assert!(start.elapsed() < READER_JOIN_TIMEOUT * 4);
        assert!(source.reader.is_none());

        source.close();
        assert!(matches!(source.capture_frame(), Err(CaptureError::EndOfStream)));
    }
}
