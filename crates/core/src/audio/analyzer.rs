use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdout, Command, Stdio},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tempfile::NamedTempFile;

use super::{AudioFrame, BitFormat, Fetch, FrameSource};
use crate::{config::AnalyzerConfig, Result, StripError};

const UNBLOCK_ATTEMPTS: usize = 10;
const UNBLOCK_INTERVAL: Duration = Duration::from_millis(10);

/// Renders the analyzer's text configuration for the given bar count.
pub fn render_analyzer_config(config: &AnalyzerConfig, bars: usize) -> String {
    format!(
        "[general]
bars = {bars}
autosens = {autosens}
higher_cutoff_freq = {cutoff}

[input]
method = {method}
source = {source}

[output]
channels = mono
method = raw
raw_target = {target}
bit_format = {format}

[smoothing]
gravity = {gravity}
",
        autosens = u8::from(config.autosens),
        cutoff = config.higher_cutoff_freq,
        method = config.input_method,
        source = config.source,
        target = config.raw_target.display(),
        format = config.bit_format.as_str(),
        gravity = config.gravity,
    )
}

/// Reads fixed-size binary records from a byte stream.
#[derive(Debug)]
pub struct RawFrameReader<R> {
    reader: R,
    format: BitFormat,
    record: Vec<u8>,
}

impl<R: Read> RawFrameReader<R> {
    pub fn new(reader: R, bars: usize, format: BitFormat) -> Self {
        Self {
            reader,
            format,
            record: vec![0; bars * format.byte_width()],
        }
    }

    /// Reads one record. A short read, including end of stream, yields
    /// `None`.
    pub fn read_frame(&mut self) -> Result<Option<AudioFrame>> {
        let mut filled = 0;
        while filled < self.record.len() {
            match self.reader.read(&mut self.record[filled..]) {
                Ok(0) => return Ok(None),
                Ok(read) => filled += read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(Some(self.format.decode(&self.record)))
    }
}

type FrameMessage = Result<Option<AudioFrame>>;

/// Decodes records on a reader thread so that consumers can wait with a
/// timeout.
///
/// The thread is detached when the stream is dropped; it exits once its
/// reader hits end of stream or the consumer is gone.
#[derive(Debug)]
pub struct FrameStream {
    frames: Receiver<FrameMessage>,
    timeout: Duration,
    ended: bool,
    reader: Option<JoinHandle<()>>,
}

impl FrameStream {
    /// Starts the reader thread. `open` runs on that thread, so opening a
    /// named pipe that has no writer yet does not block the caller.
    pub fn spawn<R, F>(open: F, bars: usize, format: BitFormat, timeout: Duration) -> Result<Self>
    where
        R: Read + 'static,
        F: FnOnce() -> io::Result<R> + Send + 'static,
    {
        let (sender, frames) = crossbeam_channel::bounded::<FrameMessage>(1);
        let reader = thread::Builder::new()
            .name("frame-reader".to_string())
            .spawn(move || {
                let source = match open() {
                    Ok(source) => source,
                    Err(err) => {
                        let _ = sender.send(Err(err.into()));
                        return;
                    }
                };
                let mut records = RawFrameReader::new(source, bars, format);
                loop {
                    let message = records.read_frame();
                    let last = !matches!(message, Ok(Some(_)));
                    if sender.send(message).is_err() || last {
                        break;
                    }
                }
            })?;

        Ok(Self {
            frames,
            timeout,
            ended: false,
            reader: Some(reader),
        })
    }

    fn is_reader_alive(&self) -> bool {
        self.reader
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl FrameSource for FrameStream {
    fn next_frame(&mut self) -> Result<Fetch<AudioFrame>> {
        if self.ended {
            return Ok(Fetch::Ended);
        }
        match self.frames.recv_timeout(self.timeout) {
            Ok(Ok(Some(frame))) => Ok(Fetch::Ready(frame)),
            Ok(Ok(None)) | Err(RecvTimeoutError::Disconnected) => {
                self.ended = true;
                Ok(Fetch::Ended)
            }
            Ok(Err(err)) => {
                self.ended = true;
                Err(err)
            }
            Err(RecvTimeoutError::Timeout) => Ok(Fetch::Pending),
        }
    }
}

/// Writes the analyzer configuration to a fresh temporary file, removed when
/// the handle is dropped.
fn write_config_file(text: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("pixelstrip-analyzer-")
        .suffix(".conf")
        .tempfile()?;
    file.write_all(text.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// The external spectrum analyzer, running as a child process.
///
/// The process is terminated and its configuration removed when this value
/// is dropped, whichever way the consuming routine exits.
#[derive(Debug)]
pub struct AnalyzerProcess {
    child: Child,
    stream: FrameStream,
    _config_file: NamedTempFile,
    fifo: Option<PathBuf>,
    created_fifo: bool,
}

impl AnalyzerProcess {
    pub fn spawn(config: &AnalyzerConfig, bars: usize) -> Result<Self> {
        let text = render_analyzer_config(config, bars);
        let config_file = write_config_file(&text)?;

        let (fifo, created_fifo) = if config.uses_stdout() {
            (None, false)
        } else {
            let created = ensure_fifo(&config.raw_target)?;
            (Some(config.raw_target.clone()), created)
        };

        let mut command = Command::new(&config.binary);
        command
            .arg("-p")
            .arg(config_file.path())
            .stdin(Stdio::null())
            .stderr(Stdio::inherit());
        if config.uses_stdout() {
            command.stdout(Stdio::piped());
        } else {
            command.stdout(Stdio::null());
        }

        let mut child = command.spawn().map_err(|err| {
            StripError::audio(format!(
                "failed to spawn analyzer {}: {err}",
                config.binary.display()
            ))
        })?;
        tracing::info!(
            binary = %config.binary.display(),
            pid = child.id(),
            bars,
            format = config.bit_format.as_str(),
            "spawned spectrum analyzer"
        );

        let format = config.bit_format;
        let timeout = config.read_timeout();
        let stream = if config.uses_stdout() {
            match child.stdout.take() {
                Some(stdout) => FrameStream::spawn(
                    move || Ok::<ChildStdout, io::Error>(stdout),
                    bars,
                    format,
                    timeout,
                ),
                None => Err(StripError::audio("analyzer stdout was not captured")),
            }
        } else {
            let fifo = config.raw_target.clone();
            FrameStream::spawn(move || File::open(fifo), bars, format, timeout)
        };

        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                if let (true, Some(fifo)) = (created_fifo, &fifo) {
                    let _ = fs::remove_file(fifo);
                }
                return Err(err);
            }
        };

        Ok(Self {
            child,
            stream,
            _config_file: config_file,
            fifo,
            created_fifo,
        })
    }

    /// Kills and reaps the child, then wakes a reader still waiting for the
    /// child to open the named pipe.
    fn stop(&mut self) {
        let pid = self.child.id();
        if let Err(err) = self.child.kill() {
            tracing::debug!(pid, %err, "analyzer already exited");
        }
        match self.child.wait() {
            Ok(status) => tracing::debug!(pid, %status, "spectrum analyzer stopped"),
            Err(err) => tracing::warn!(pid, %err, "failed to reap spectrum analyzer"),
        }

        if let Some(fifo) = self.fifo.take() {
            for _ in 0..UNBLOCK_ATTEMPTS {
                if !self.stream.is_reader_alive() {
                    break;
                }
                unblock_fifo_reader(&fifo);
                thread::sleep(UNBLOCK_INTERVAL);
            }
            if self.created_fifo {
                let _ = fs::remove_file(&fifo);
            }
        }
    }
}

impl FrameSource for AnalyzerProcess {
    fn next_frame(&mut self) -> Result<Fetch<AudioFrame>> {
        let fetch = self.stream.next_frame()?;
        if !matches!(fetch, Fetch::Pending) {
            return Ok(fetch);
        }
        // Nothing arrived in time. An analyzer that died before writing (or
        // before opening its pipe) never ends the stream on its own.
        if let Some(status) = self.child.try_wait()? {
            tracing::warn!(pid = self.child.id(), %status, "spectrum analyzer exited");
            self.stream.ended = true;
            return Ok(Fetch::Ended);
        }
        Ok(Fetch::Pending)
    }
}

impl Drop for AnalyzerProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens the write end without blocking so that a reader stuck in `open`
/// returns and then sees end of stream.
#[cfg(unix)]
fn unblock_fifo_reader(fifo: &Path) {
    use std::{fs::OpenOptions, os::unix::fs::OpenOptionsExt};

    match OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(fifo)
    {
        Ok(_) => tracing::debug!(fifo = %fifo.display(), "released pipe reader"),
        Err(err) => tracing::debug!(fifo = %fifo.display(), %err, "pipe has no reader"),
    }
}

#[cfg(not(unix))]
fn unblock_fifo_reader(_fifo: &Path) {}

/// Creates the named pipe when missing. Returns whether this call created it.
#[cfg(unix)]
fn ensure_fifo(path: &Path) -> Result<bool> {
    use std::{ffi::CString, os::unix::ffi::OsStrExt};

    if path.exists() {
        return Ok(false);
    }
    let raw = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| StripError::config("raw_target contains a NUL byte"))?;
    // SAFETY: `raw` is a valid NUL-terminated path for the duration of the call.
    if unsafe { libc::mkfifo(raw.as_ptr(), 0o644) } != 0 {
        return Err(StripError::audio(format!(
            "failed to create fifo {}: {}",
            path.display(),
            io::Error::last_os_error()
        )));
    }
    Ok(true)
}

#[cfg(not(unix))]
fn ensure_fifo(path: &Path) -> Result<bool> {
    Err(StripError::config(format!(
        "named pipe {} is not supported on this platform",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn stream_of(bytes: Vec<u8>, bars: usize, format: BitFormat) -> FrameStream {
        FrameStream::spawn(
            move || Ok::<_, io::Error>(Cursor::new(bytes)),
            bars,
            format,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn reader_returns_none_on_short_record() {
        let bytes = Cursor::new(vec![10, 20, 30, 40, 50, 60]);
        let mut reader = RawFrameReader::new(bytes, 4, BitFormat::Eight);

        assert!(reader.read_frame().unwrap().is_some());
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn stream_decodes_frames_then_ends() {
        let mut stream = stream_of(vec![0, 64, 128, 255], 4, BitFormat::Eight);

        let frame = stream.next_frame().unwrap().ready().expect("a frame");
        let expected = [0.0, 0.251, 0.502, 1.0];
        for (level, expected) in frame.levels().iter().zip(expected) {
            assert!((level - expected).abs() < 1e-3);
        }

        assert!(stream.next_frame().unwrap().is_ended());
        assert!(stream.next_frame().unwrap().is_ended());
    }

    #[test]
    fn short_read_ends_stream_without_error() {
        let mut stream = stream_of(vec![1, 2, 3], 2, BitFormat::Sixteen);
        assert_eq!(stream.next_frame().unwrap(), Fetch::Ended);

        let mut empty = stream_of(Vec::new(), 4, BitFormat::Eight);
        assert_eq!(empty.next_frame().unwrap(), Fetch::Ended);
    }

    struct SlowReader;

    impl Read for SlowReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(Duration::from_millis(300));
            Ok(0)
        }
    }

    #[test]
    fn stalled_reader_reports_pending() {
        let mut stream = FrameStream::spawn(
            || Ok::<_, io::Error>(SlowReader),
            4,
            BitFormat::Eight,
            Duration::from_millis(20),
        )
        .unwrap();

        assert_eq!(stream.next_frame().unwrap(), Fetch::Pending);
    }

    #[test]
    fn open_failures_surface_as_errors() {
        let mut stream = FrameStream::spawn(
            || File::open("/nonexistent/pixelstrip/fifo"),
            4,
            BitFormat::Eight,
            Duration::from_secs(5),
        )
        .unwrap();

        assert!(matches!(stream.next_frame(), Err(StripError::Io(_))));
        assert!(stream.next_frame().unwrap().is_ended());
    }

    #[test]
    fn renders_config_text() {
        let config = AnalyzerConfig {
            bit_format: BitFormat::Sixteen,
            source: "echoCancel_source".to_string(),
            ..AnalyzerConfig::default()
        };
        let text = render_analyzer_config(&config, 25);

        assert!(text.contains("[general]\nbars = 25\nautosens = 0\n"));
        assert!(text.contains("source = echoCancel_source"));
        assert!(text.contains("raw_target = /dev/stdout"));
        assert!(text.contains("bit_format = 16bit"));
        assert!(text.contains("gravity = 100"));
    }

    #[test]
    fn missing_binary_fails_to_spawn() {
        let config = AnalyzerConfig {
            binary: PathBuf::from("/nonexistent/pixelstrip-analyzer"),
            ..AnalyzerConfig::default()
        };

        let err = AnalyzerProcess::spawn(&config, 4).unwrap_err();
        assert!(matches!(err, StripError::Audio(_)));
    }

    #[cfg(target_os = "linux")]
    mod process {
        use std::{os::unix::fs::PermissionsExt, time::Instant};

        use super::*;

        fn script(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("analyzer.sh");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if condition() {
                    return true;
                }
                thread::sleep(Duration::from_millis(10));
            }
            false
        }

        fn is_running(pid: u32) -> bool {
            Path::new(&format!("/proc/{pid}")).exists()
        }

        #[test]
        fn short_output_ends_and_cleans_up() {
            let dir = tempfile::tempdir().unwrap();
            let config = AnalyzerConfig {
                binary: script(dir.path(), r"printf '\000\100\200\377'"),
                read_timeout_ms: 2_000,
                ..AnalyzerConfig::default()
            };

            let mut analyzer = AnalyzerProcess::spawn(&config, 4).unwrap();
            let config_path = analyzer._config_file.path().to_path_buf();
            assert!(config_path.exists());

            let frame = analyzer.next_frame().unwrap().ready().expect("one frame");
            assert_eq!(frame.levels()[0], 0.0);
            assert_eq!(frame.levels()[3], 1.0);
            assert!(analyzer.next_frame().unwrap().is_ended());
            assert!(wait_until(|| matches!(analyzer.child.try_wait(), Ok(Some(_)))));

            let pid = analyzer.child.id();
            drop(analyzer);
            assert!(!config_path.exists());
            assert!(!is_running(pid));
        }

        #[test]
        fn dropping_stops_a_running_analyzer() {
            let dir = tempfile::tempdir().unwrap();
            let config = AnalyzerConfig {
                binary: script(dir.path(), "exec sleep 30"),
                read_timeout_ms: 50,
                ..AnalyzerConfig::default()
            };

            let mut analyzer = AnalyzerProcess::spawn(&config, 4).unwrap();
            let pid = analyzer.child.id();
            assert!(is_running(pid));
            assert_eq!(analyzer.next_frame().unwrap(), Fetch::Pending);

            drop(analyzer);
            assert!(!is_running(pid));
        }

        #[test]
        fn analyzer_dying_before_opening_its_pipe_ends_the_stream() {
            let dir = tempfile::tempdir().unwrap();
            let fifo = dir.path().join("bars.fifo");
            let config = AnalyzerConfig {
                binary: script(dir.path(), "exit 1"),
                raw_target: fifo.clone(),
                read_timeout_ms: 50,
                ..AnalyzerConfig::default()
            };

            let mut analyzer = AnalyzerProcess::spawn(&config, 4).unwrap();
            assert!(fifo.exists());

            let ended = (0..40).any(|_| analyzer.next_frame().unwrap().is_ended());
            assert!(ended, "stream kept waiting on a dead analyzer");
            assert!(analyzer.next_frame().unwrap().is_ended());

            analyzer.stop();
            assert!(wait_until(|| !analyzer.stream.is_reader_alive()));
            assert!(!fifo.exists());
        }
    }
}
