//! Where the user is sent when a session cannot be recovered.

use tracing::warn;

/// Route used for unrecoverable authentication failures.
pub const LOGIN_PATH: &str = "/login";

/// Navigation sink injected into the client.
pub trait Navigator: Send + Sync {
    /// Current location, if the host has one.
    fn current_path(&self) -> Option<String>;

    /// Send the user to `path`.
    fn redirect(&self, path: &str);
}

/// Default sink for processes without a browsing context: records the
/// redirect in the log and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn current_path(&self) -> Option<String> {
        None
    }

    fn redirect(&self, path: &str) {
        warn!(path, "Session could not be recovered, sign-in required");
    }
}

/// Redirect to the login route unless the navigator is already there.
/// Returns whether a redirect was issued.
pub(crate) fn redirect_to_login(navigator: &dyn Navigator) -> bool {
    let on_login = navigator
        .current_path()
        .is_some_and(|path| path.contains("login"));
    if on_login {
        return false;
    }
    navigator.redirect(LOGIN_PATH);
    true
}
