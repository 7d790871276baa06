// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `config.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_controller_config_defaults() {
        let cli = Cli::try_parse_from([
            "bestgres",
            "--mode",
            "controller",
            "--pod-name",
            "orders-0",
            "--pod-namespace",
            "db",
        ])
        .unwrap();

        let config = ControllerConfig::from_cli(&cli).unwrap();

        assert_eq!(cli.mode, Mode::Controller);
        assert_eq!(config.pod_name, "orders-0");
        assert_eq!(config.namespace, "db");
        assert_eq!(config.patroni_url, "http://localhost:8008/patroni");
        assert_eq!(config.spilo_config, PathBuf::from("/scripts/configure_spilo.py"));
        assert_eq!(config.psql_bin, "psql");
        assert_eq!(config.psql_user, "postgres");
        assert_eq!(config.supervisor_stop, vec!["sv", "stop", "patroni"]);
    }

    #[test]
    fn test_missing_pod_name_is_fatal() {
        let cli = Cli::try_parse_from(["bestgres", "--mode", "controller", "--pod-namespace", "db"])
            .unwrap();

        assert_eq!(
            ControllerConfig::from_cli(&cli),
            Err(ConfigError::MissingEnv("POD_NAME"))
        );
    }

    #[test]
    fn test_blank_namespace_is_fatal() {
        let cli = Cli::try_parse_from([
            "bestgres",
            "--mode",
            "controller",
            "--pod-name",
            "orders-0",
            "--pod-namespace",
            "  ",
        ])
        .unwrap();

        assert_eq!(
            ControllerConfig::from_cli(&cli),
            Err(ConfigError::MissingEnv("POD_NAMESPACE"))
        );
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(Cli::try_parse_from(["bestgres", "--mode", "sidecar"]).is_err());
    }

    #[test]
    fn test_every_mode_parses() {
        for (value, mode) in [
            ("controller", Mode::Controller),
            ("operator", Mode::Operator),
            ("init", Mode::Init),
        ] {
            let cli = Cli::try_parse_from(["bestgres", "--mode", value]).unwrap();
            assert_eq!(cli.mode, mode);
        }
    }

    #[test]
    fn test_custom_supervisor_stop_command() {
        let cli = Cli::try_parse_from([
            "bestgres",
            "--mode",
            "controller",
            "--pod-name",
            "orders-0",
            "--pod-namespace",
            "db",
            "--supervisor-stop",
            "patronictl  pause",
        ])
        .unwrap();

        let config = ControllerConfig::from_cli(&cli).unwrap();

        assert_eq!(config.supervisor_stop, vec!["patronictl", "pause"]);
    }
}
