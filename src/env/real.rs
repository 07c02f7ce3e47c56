use std::borrow::Cow;
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;

use super::{Env, Stream};

/// Use real I/O and the real clock.
pub struct RealEnv;

impl Env for RealEnv {
    fn args_os(&self) -> impl Iterator<Item = OsString> {
        std::env::args_os()
    }

    fn stdout(&self) -> Stream<impl io::Write> {
        let stdout = io::stdout();
        let is_terminal = stdout.is_terminal();
        Stream {
            writer: Mutex::new(stdout),
            is_terminal,
        }
    }

    fn stderr(&self) -> Stream<impl io::Write + Send + Sync + 'static> {
        let stderr = io::stderr();
        let is_terminal = stderr.is_terminal();
        Stream {
            writer: Mutex::new(stderr),
            is_terminal,
        }
    }

    fn in_cwd<'a>(&self, path: &'a impl AsRef<Path>) -> Cow<'a, Path> {
        path.as_ref().into()
    }

    fn seconds_since_epoch(&self) -> u32 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }

    fn set_seconds_since_epoch(&mut self, _seconds: u32) {
        // The real clock is not ours to set.
    }
}
