//! Process-backed terminal over stdin/stdout file descriptors.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::EnvConfig;
use crate::terminal::{LineRead, Terminal};

const INPUT_POLL_MS: i32 = 50;

/// Line-mode terminal bound to the process stdin/stdout.
///
/// Input is read on a dedicated thread and handed over as whole lines, so the
/// caller can wait with a timeout instead of blocking inside `read(2)`.
pub struct ProcessTerminal {
    stdin_fd: c_int,
    stdout_fd: c_int,
    lines: Option<Receiver<LineRead>>,
    input_thread: Option<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    input_closed: bool,
    write_log: Option<File>,
}

impl ProcessTerminal {
    pub fn new(config: &EnvConfig) -> Self {
        let write_log = config.write_log.as_deref().and_then(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

        Self {
            stdin_fd: libc::STDIN_FILENO,
            stdout_fd: libc::STDOUT_FILENO,
            lines: None,
            input_thread: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            input_closed: false,
            write_log,
        }
    }

    /// Stops the input thread. Further reads report EOF.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.input_thread.take() {
            let _ = handle.join();
        }
        self.lines = None;
        self.input_closed = true;
    }

    fn ensure_input_thread(&mut self) {
        if self.lines.is_some() || self.input_closed {
            return;
        }

        let (sender, receiver) = mpsc::channel();
        let stdin_fd = self.stdin_fd;
        let stop_flag = Arc::clone(&self.stop_flag);
        let spawned = thread::Builder::new()
            .name("agent-terminal-input".to_string())
            .spawn(move || read_lines(stdin_fd, &stop_flag, &sender));

        match spawned {
            Ok(handle) => {
                self.input_thread = Some(handle);
                self.lines = Some(receiver);
            }
            Err(_) => self.input_closed = true,
        }
    }
}

impl Drop for ProcessTerminal {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Terminal for ProcessTerminal {
    fn write(&mut self, data: &str) {
        if data.is_empty() {
            return;
        }
        let _ = write_all_fd(self.stdout_fd, data.as_bytes());
        if let Some(log) = self.write_log.as_mut() {
            let _ = log.write_all(data.as_bytes());
        }
    }

    fn read_line(&mut self, timeout: Duration) -> LineRead {
        self.ensure_input_thread();
        let Some(lines) = self.lines.as_ref() else {
            return LineRead::Eof;
        };

        match lines.recv_timeout(timeout) {
            Ok(LineRead::Eof) | Err(RecvTimeoutError::Disconnected) => {
                self.lines = None;
                self.input_closed = true;
                LineRead::Eof
            }
            Ok(read) => read,
            Err(RecvTimeoutError::Timeout) => LineRead::Pending,
        }
    }

    fn is_interactive(&self) -> bool {
        unsafe { libc::isatty(self.stdout_fd) == 1 }
    }

    fn columns(&self) -> u16 {
        read_winsize(self.stdout_fd)
            .map(|(columns, _)| columns)
            .unwrap_or(80)
    }
}

fn read_lines(fd: c_int, stop_flag: &AtomicBool, sender: &Sender<LineRead>) {
    let mut buffer = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();

    while !stop_flag.load(Ordering::SeqCst) {
        if !poll_readable(fd, INPUT_POLL_MS) {
            continue;
        }

        let read_len = unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut _, buffer.len()) };
        if read_len < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            break;
        }
        if read_len == 0 {
            break;
        }

        pending.extend_from_slice(&buffer[..read_len as usize]);
        for line in drain_complete_lines(&mut pending) {
            if sender.send(LineRead::Line(line)).is_err() {
                return;
            }
        }
    }

    if !pending.is_empty() {
        let _ = sender.send(LineRead::Line(decode_line(&pending)));
    }
    let _ = sender.send(LineRead::Eof);
}

/// Splits off every newline-terminated line, leaving any partial tail in `pending`.
fn drain_complete_lines(pending: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(newline) = pending.iter().position(|byte| *byte == b'\n') {
        let line: Vec<u8> = pending.drain(..=newline).collect();
        lines.push(decode_line(&line[..line.len() - 1]));
    }
    lines
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn write_all_fd(fd: c_int, bytes: &[u8]) -> std::io::Result<()> {
    let mut written = 0;
    while written < bytes.len() {
        let remaining = &bytes[written..];
        let result =
            unsafe { libc::write(fd, remaining.as_ptr() as *const libc::c_void, remaining.len()) };
        if result < 0 {
            let err = std::io::Error::last_os_error();
            match err.kind() {
                std::io::ErrorKind::Interrupted => continue,
                std::io::ErrorKind::WouldBlock => {
                    wait_writable(fd)?;
                    continue;
                }
                _ => return Err(err),
            }
        }
        if result == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write returned 0",
            ));
        }
        written += result as usize;
    }
    Ok(())
}

fn wait_writable(fd: c_int) -> std::io::Result<()> {
    let mut fds = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    loop {
        let result = unsafe { libc::poll(&mut fds, 1, -1) };
        if result < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if (fds.revents & libc::POLLOUT) != 0 {
            return Ok(());
        }
        if result > 0 {
            return Err(std::io::Error::other(format!(
                "poll(POLLOUT) returned revents=0x{:x}",
                fds.revents
            )));
        }
    }
}

fn poll_readable(fd: c_int, timeout_ms: i32) -> bool {
    let mut fds = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let result = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
    result > 0 && (fds.revents & (libc::POLLIN | libc::POLLHUP)) != 0
}

fn read_winsize(fd: c_int) -> Option<(u16, u16)> {
    let mut size = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut size) };
    if result == 0 && size.ws_col > 0 && size.ws_row > 0 {
        Some((size.ws_col, size.ws_row))
    } else {
        None
    }
}
