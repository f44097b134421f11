//! Startup banner for the front orchestrator

use super::constants::APP_NAME;
use crate::utils::terminal::terminal_link;

/// True if `host` binds to all interfaces (`0.0.0.0` or `::`)
fn is_all_interfaces(host: &str) -> bool {
    host == "0.0.0.0" || host == "::"
}

/// Print the startup banner for the front orchestrator (HTTP ingress)
pub fn print_banner(host: &str, port: u16, cache_backend: &str, topics_backend: &str) {
    let display_host = if is_all_interfaces(host) {
        "localhost"
    } else {
        host
    };

    println!();
    println!(
        "  \x1b[1m\x1b[36m{}\x1b[0m \x1b[90mv{}\x1b[0m",
        APP_NAME,
        env!("CARGO_PKG_VERSION")
    );
    println!();

    const W: usize = 21;

    let local_url = format!("http://{}:{}", display_host, port);
    println!(
        "  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}",
        "Ingress:",
        terminal_link(&local_url)
    );

    println!(
        "  \x1b[90m➜  {:<W$} {}\x1b[0m",
        "Cache backend:", cache_backend
    );
    println!(
        "  \x1b[90m➜  {:<W$} {}\x1b[0m",
        "Topics backend:", topics_backend
    );

    if host == "127.0.0.1" || host == "localhost" {
        println!(
            "  \x1b[90m➜  {:<W$} use --host 0.0.0.0 to expose\x1b[0m",
            "Network:"
        );
    } else if !is_all_interfaces(host) {
        let network_url = format!("http://{}:{}", host, port);
        println!(
            "  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}",
            "Network:",
            terminal_link(&network_url)
        );
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_all_interfaces() {
        assert!(is_all_interfaces("0.0.0.0"));
        assert!(is_all_interfaces("::"));
        assert!(!is_all_interfaces("127.0.0.1"));
    }
}
