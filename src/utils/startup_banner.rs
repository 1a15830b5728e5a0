const RESET: &str = "\x1b[0m";
const ACCENT: &str = "\x1b[38;5;172m";
const DIM_GRAY: &str = "\x1b[2;90m";
const BANNER: &str = r#"
  _          _              _
 | |__   ___| |_ __ _  __ _| |_ ___
 | '_ \ / _ \ __/ _` |/ _` | __/ _ \
 | |_) |  __/ || (_| | (_| | ||  __/
 |_.__/ \___|\__\__, |\__,_|\__\___|
                |___/               "#;
const APP_DESCRIPTION: &str =
    "Lottery bet collection server: agencies upload batches over TCP, one draw when all are done.";

pub fn print_startup_banner() {
    println!("{ACCENT}{BANNER}{RESET}");
    println!("{}", version_line());
    println!("{APP_DESCRIPTION}");
    println!("{DIM_GRAY}Draw runs once per process; restart to collect a new round.{RESET}");
    println!();
    println!("================================================================");
    println!();
}

fn version_line() -> String {
    format!(
        "{} v{} | build {} | rev {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("BETGATE_BUILD_DATE_UTC"),
        env!("BETGATE_GIT_REVISION"),
    )
}
