use staffdesk_core::config::{AppConfig, LoadOptions};

/// Render the effective configuration. Values follow the load precedence
/// (env > file > default); the env var that can override each key is listed
/// so operators can see where to reach.
pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line("database.url", &config.database.url, "STAFFDESK_DATABASE_URL"));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        "STAFFDESK_DATABASE_MAX_CONNECTIONS",
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        "STAFFDESK_DATABASE_TIMEOUT_SECS",
    ));
    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        "STAFFDESK_SERVER_BIND_ADDRESS",
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        "STAFFDESK_SERVER_PORT",
    ));
    lines.push(render_line(
        "server.graceful_shutdown_secs",
        &config.server.graceful_shutdown_secs.to_string(),
        "STAFFDESK_SERVER_GRACEFUL_SHUTDOWN_SECS",
    ));
    lines.push(render_line(
        "workflow.privileged_roles",
        &config.workflow.privileged_roles.join(","),
        "STAFFDESK_WORKFLOW_PRIVILEGED_ROLES",
    ));
    lines.push(render_line("logging.level", &config.logging.level, "STAFFDESK_LOGGING_LEVEL"));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format).to_lowercase(),
        "STAFFDESK_LOGGING_FORMAT",
    ));

    lines.join("\n")
}

fn render_line(key: &str, value: &str, env_var: &str) -> String {
    format!("  {key} = {value}  (env: {env_var})")
}

#[cfg(test)]
mod tests {
    use super::run;

    #[test]
    fn config_output_lists_every_section() {
        let output = run();
        for key in [
            "database.url",
            "server.bind_address",
            "workflow.privileged_roles",
            "logging.level",
        ] {
            assert!(output.contains(key), "missing `{key}` in config output");
        }
    }
}
