use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets
    const DISPLAY_ENVS: [&str; 17] = [
        "RUST_LOG",
        "OPG_HOST",
        "OPG_PORT",
        "OPG_DATABASE_URL",
        "OPG_MAX_CONNECTIONS",
        "OPG_USE_X_FORWARDED_FOR",
        "OPG_USE_FORWARDED",
        "OPG_GATEWAY_HMAC_CHECKS",
        "OPG_AMOUNT_TOLERANCE",
        "OPG_SWEEP_INTERVAL",
        "OPG_QUEUED_TIMEOUT",
        "OPG_PROCESSING_TIMEOUT",
        "OPG_DISPATCH_INTERVAL",
        "OPG_DISPATCH_BATCH_SIZE",
        "OPG_MAX_NOTIFICATION_RETRIES",
        "OPG_RATE_LIMIT_WINDOW",
        "OPG_RATE_LIMIT_MAX",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    });
    // Secrets only report whether they are present
    for name in ["OPG_ADMIN_API_KEY", "OPG_GATEWAY_HMAC_SECRET"] {
        let val = if env::var(name).is_ok() { "Set (hidden)" } else { "Not set" };
        println!("  {name:<35} {val:<15}");
    }
}
