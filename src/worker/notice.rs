//! User-facing conditions raised by the supervisor.

use std::sync::Mutex;
use tracing::error;

/// Conditions shown to the user as dialogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserNotice {
    /// Neither the worker binary nor the script fallback could be started.
    DownloadsUnavailable,
    /// The worker started but never answered its health check.
    ServiceUnresponsive,
}

impl UserNotice {
    pub fn title(&self) -> &'static str {
        match self {
            UserNotice::DownloadsUnavailable => "Download service unavailable",
            UserNotice::ServiceUnresponsive => "Download service error",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            UserNotice::DownloadsUnavailable => {
                "The download service could not be started.\n\n\
                 The bundled worker binary is missing or was blocked (antivirus software often removes it).\n\
                 Reinstall the application or allow the binary, or install Python to use the fallback.\n\n\
                 You can still use the app, but downloads and torrents will be disabled."
            }
            UserNotice::ServiceUnresponsive => {
                "Failed to start the download service.\n\n\
                 The service did not respond in time. Please try restarting the application."
            }
        }
    }
}

/// The three states of the download subsystem as seen by the rest of the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Unavailable,
    Unresponsive,
    Ready,
}

/// Sink for user notices; the host application shows them as dialogs.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: UserNotice);
}

/// Default sink when no UI is attached.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: UserNotice) {
        error!(title = notice.title(), "{}", notice.message());
    }
}

/// Keeps every notice; handy for embedding and tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<UserNotice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<UserNotice> {
        self.notices
            .lock()
            .expect("RecordingNotifier lock poisoned")
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: UserNotice) {
        self.notices
            .lock()
            .expect("RecordingNotifier lock poisoned")
            .push(notice);
    }
}

impl<N: Notifier + ?Sized> Notifier for std::sync::Arc<N> {
    fn notify(&self, notice: UserNotice) {
        (**self).notify(notice)
    }
}
