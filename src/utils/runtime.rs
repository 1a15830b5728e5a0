use std::process;

/// Signal handling and socket half-close rely on POSIX semantics.
pub fn ensure_posix_or_exit() {
    if !cfg!(unix) {
        eprintln!("unsupported platform: betgate runs on POSIX systems only");
        process::exit(2);
    }
}
