//! Host UI seam
//!
//! Everything the core needs from the surrounding user interface:
//! notifications, a cancellable progress dialog, list selection, yes/no
//! prompts, the transient "busy" state and the resolved-URL signal.
//! [`ConsoleHost`] implements it for a terminal.

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Select};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::Output;

/// A progress dialog the user may cancel
pub trait ProgressDialog: Send {
    /// Set progress (0-100) and the detail text
    fn update(&mut self, percent: u8, message: &str);

    /// User asked to cancel
    fn is_canceled(&self) -> bool;

    /// Dismiss the dialog
    fn close(&mut self);
}

/// User interface provided by the host application
pub trait Host: Send + Sync {
    /// Short transient notification
    fn notify(&self, message: &str);

    /// Open a progress dialog
    fn progress(&self, heading: &str) -> Box<dyn ProgressDialog>;

    /// Ask the user to pick one of `items`; `None` when dismissed
    fn select(&self, heading: &str, items: &[String]) -> Option<usize>;

    /// Yes/no question
    fn confirm(&self, heading: &str, message: &str) -> bool;

    /// A transient busy screen is showing
    fn is_busy(&self) -> bool {
        false
    }

    /// Announce (`Some`) or retract (`None`) the playable URL
    fn resolved(&self, url: Option<&str>);
}

// =============================================================================
// Console Host
// =============================================================================

/// Terminal implementation of [`Host`]
///
/// User cancellation is the `cancel` token, typically tripped by Ctrl-C.
pub struct ConsoleHost {
    output: Output,
    cancel: CancellationToken,
    interactive: bool,
}

impl ConsoleHost {
    pub fn new(output: Output, cancel: CancellationToken) -> Self {
        let interactive = std::io::stdin().is_terminal() && !output.json;
        Self {
            output,
            cancel,
            interactive,
        }
    }

    /// Token the host trips when the user cancels
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Host for ConsoleHost {
    fn notify(&self, message: &str) {
        info!(message, "Notification");
        self.output.info(message);
    }

    fn progress(&self, heading: &str) -> Box<dyn ProgressDialog> {
        let bar = if self.output.quiet || self.output.json {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(100)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} [{bar:40.cyan/blue}] {pos:>3}% {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_prefix(heading.to_string());
        Box::new(ConsoleProgress {
            bar,
            cancel: self.cancel.clone(),
        })
    }

    fn select(&self, heading: &str, items: &[String]) -> Option<usize> {
        if !self.interactive {
            debug!("Non-interactive session, dismissing selection '{}'", heading);
            return None;
        }
        blocking_prompt(|| {
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt(heading)
                .items(items)
                .default(0)
                .interact_opt()
                .ok()
                .flatten()
        })
    }

    fn confirm(&self, heading: &str, message: &str) -> bool {
        if !self.interactive {
            return false;
        }
        blocking_prompt(|| {
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("{}: {}", heading, message))
                .default(false)
                .interact()
                .unwrap_or(false)
        })
    }

    fn resolved(&self, url: Option<&str>) {
        match url {
            Some(url) => self.output.info(format!("Streaming from {}", url)),
            None => debug!("Playback resolution retracted"),
        }
    }
}

/// Run a blocking terminal prompt without stalling other tasks
///
/// On a multi-thread runtime the worker hands its queue off first; anywhere
/// else the prompt simply runs in place.
fn blocking_prompt<T>(prompt: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(prompt)
        }
        _ => prompt(),
    }
}

// =============================================================================
// Null Host
// =============================================================================

/// Headless host: notifications go to the log, prompts are dismissed
pub struct NullHost;

impl Host for NullHost {
    fn notify(&self, message: &str) {
        info!(message, "Notification");
    }

    fn progress(&self, _heading: &str) -> Box<dyn ProgressDialog> {
        Box::new(NullProgress)
    }

    fn select(&self, _heading: &str, _items: &[String]) -> Option<usize> {
        None
    }

    fn confirm(&self, _heading: &str, _message: &str) -> bool {
        false
    }

    fn resolved(&self, _url: Option<&str>) {}
}

struct NullProgress;

impl ProgressDialog for NullProgress {
    fn update(&mut self, _percent: u8, _message: &str) {}

    fn is_canceled(&self) -> bool {
        false
    }

    fn close(&mut self) {}
}

struct ConsoleProgress {
    bar: ProgressBar,
    cancel: CancellationToken,
}

impl ProgressDialog for ConsoleProgress {
    fn update(&mut self, percent: u8, message: &str) {
        self.bar.set_position(u64::from(percent.min(100)));
        self.bar.set_message(message.replace('\n', " | "));
    }

    fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn close(&mut self) {
        self.bar.finish_and_clear();
    }
}
