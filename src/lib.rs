//! Line-mode terminal primitives for transcript-style agents.
//!
//! The agent prints a growing transcript rather than repainting a screen, so
//! this crate stays small: a [`Terminal`] trait for prompt input and streamed
//! output, a [`ProcessTerminal`] bound to the process stdin/stdout, ANSI
//! [`style`] helpers, and an [`InterruptHandler`] that turns SIGINT into a
//! cancellation flag for whatever turn is running.
//!
//! Invariant: all terminal output goes through [`Terminal::write`]; nothing in
//! this crate prints directly.

pub mod config;
pub mod interrupt;
#[cfg(unix)]
pub mod process_terminal;
pub mod style;
pub mod terminal;

pub use crate::config::EnvConfig;
pub use crate::interrupt::InterruptHandler;
#[cfg(unix)]
pub use crate::process_terminal::ProcessTerminal;
pub use crate::style::{clip_to_width, paint, visible_width, Style};
pub use crate::terminal::{BufferTerminal, LineRead, Terminal};
