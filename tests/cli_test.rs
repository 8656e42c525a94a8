//! CLI Command Tests
//!
//! Tests for all CLI commands with mocked backends.
//! Covers JSON output format, exit codes, and input validation.

const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

// =============================================================================
// CLI Argument Parsing Tests
// =============================================================================

mod cli_parsing {
    use super::HASH;
    use clap::Parser;
    use jacktorr::cli::{Cli, Command, SettingsAction};
    use std::path::PathBuf;

    #[test]
    fn test_command_is_required() {
        assert!(Cli::try_parse_from(["jacktorr"]).is_err());
    }

    #[test]
    fn test_service_command() {
        let cli = Cli::parse_from(["jacktorr", "service"]);
        assert!(matches!(cli.command, Command::Service));
    }

    #[test]
    fn test_add_with_title() {
        let cli = Cli::parse_from([
            "jacktorr",
            "add",
            "magnet:?xt=urn:btih:abc",
            "--title",
            "Big Buck Bunny",
        ]);
        match cli.command {
            Command::Add(cmd) => {
                assert_eq!(cmd.source, "magnet:?xt=urn:btih:abc");
                assert_eq!(cmd.title.as_deref(), Some("Big Buck Bunny"));
            }
            _ => panic!("Expected Add command"),
        }
    }

    #[test]
    fn test_play_defaults_to_buffering() {
        let cli = Cli::parse_from(["jacktorr", "play", HASH]);
        match cli.command {
            Command::Play(cmd) => {
                assert_eq!(cmd.hash, HASH);
                assert!(!cmd.no_buffer);
            }
            _ => panic!("Expected Play command"),
        }
    }

    #[test]
    fn test_play_path() {
        let cli = Cli::parse_from(["jacktorr", "play-path", "/tmp/a.torrent", "--no-buffer"]);
        match cli.command {
            Command::PlayPath(cmd) => {
                assert_eq!(cmd.path, PathBuf::from("/tmp/a.torrent"));
                assert!(cmd.no_buffer);
            }
            _ => panic!("Expected PlayPath command"),
        }
    }

    #[test]
    fn test_cat_without_path() {
        let cli = Cli::parse_from(["jacktorr", "cat", HASH, "3"]);
        match cli.command {
            Command::Cat(arg) => {
                assert_eq!(arg.file_id, 3);
                assert!(arg.path.is_none());
            }
            _ => panic!("Expected Cat command"),
        }
    }

    #[test]
    fn test_file_id_must_be_numeric() {
        assert!(Cli::try_parse_from(["jacktorr", "buffer-and-play", HASH, "first"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "jacktorr",
            "status",
            HASH,
            "--json",
            "--config",
            "/etc/jacktorr.toml",
            "--data-dir",
            "/var/lib/jacktorr",
        ]);
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/jacktorr.toml")));
        assert_eq!(cli.data_dir, Some(PathBuf::from("/var/lib/jacktorr")));
        assert!(cli.should_json());
    }

    #[test]
    fn test_command_aliases() {
        let cli = Cli::parse_from(["jacktorr", "ls"]);
        assert!(matches!(cli.command, Command::Torrents));

        let cli = Cli::parse_from(["jacktorr", "rm", HASH]);
        assert!(matches!(cli.command, Command::Remove(_)));

        let cli = Cli::parse_from(["jacktorr", "pm", "magnet:?xt=urn:btih:abc"]);
        assert!(matches!(cli.command, Command::PlayMagnet(_)));
    }

    #[test]
    fn test_remove_save_db_flag() {
        let cli = Cli::parse_from(["jacktorr", "remove", HASH]);
        match cli.command {
            Command::Remove(cmd) => {
                assert_eq!(cmd.hash, HASH);
                assert!(!cmd.no_save_db);
            }
            _ => panic!("Expected Remove command"),
        }

        let cli = Cli::parse_from(["jacktorr", "rm", "--no-save-db", HASH]);
        match cli.command {
            Command::Remove(cmd) => assert!(cmd.no_save_db),
            _ => panic!("Expected Remove command"),
        }
    }

    #[test]
    fn test_settings_show() {
        let cli = Cli::parse_from(["jacktorr", "settings", "show"]);
        match cli.command {
            Command::Settings(cmd) => assert_eq!(cmd.action, SettingsAction::Show),
            _ => panic!("Expected Settings command"),
        }
    }
}

// =============================================================================
// JSON Output Tests
// =============================================================================

mod json_output {
    use jacktorr::cli::{ExitCode, FileRow, JsonOutput, PlayResponse, StatusOk};
    use jacktorr::stream::MediaKind;
    use serde_json::json;

    #[test]
    fn test_json_output_success() {
        let output = JsonOutput::success(vec!["a", "b"]);
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value, json!({"data": ["a", "b"]}));
    }

    #[test]
    fn test_json_output_error() {
        let output = JsonOutput::<()>::error_msg("Daemon not reachable", ExitCode::NetworkError);
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(
            value,
            json!({"error": "Daemon not reachable", "exit_code": 3})
        );
    }

    #[test]
    fn test_status_ok_format() {
        let value = serde_json::to_value(StatusOk::default()).unwrap();
        assert_eq!(value, json!({"status": "ok"}));
    }

    #[test]
    fn test_file_row_kind() {
        let row = FileRow {
            id: 1,
            path: "bbb/bbb.mkv".to_string(),
            length: 10,
            kind: MediaKind::from_path("bbb/bbb.mkv"),
            stream_url: "http://localhost:8090/stream/bbb.mkv?link=x&index=1&play".to_string(),
        };
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["kind"], json!("video"));
        assert_eq!(value["id"], json!(1));
    }

    #[test]
    fn test_play_response_omits_missing_error() {
        let played = PlayResponse {
            hash: super::HASH.to_string(),
            outcome: "played",
            error: None,
        };
        let value = serde_json::to_value(&played).unwrap();
        assert!(value.get("error").is_none());
        assert_eq!(value["outcome"], json!("played"));
    }
}

// =============================================================================
// Command Handler Tests
// =============================================================================

mod command_handlers {
    use super::HASH;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use jacktorr::api::TorrServerClient;
    use jacktorr::cli::{Command, ExitCode, HashArg, Output, PlayCmd, PlaySourceCmd, SettingsAction, SettingsCmd};
    use jacktorr::commands;
    use jacktorr::config::{DataPaths, Settings};
    use jacktorr::context::AppContext;
    use jacktorr::host::NullHost;

    const QUIET: Output = Output {
        json: true,
        quiet: true,
    };

    fn context(dir: &TempDir, base_url: &str, settings: Settings) -> AppContext {
        let mut ctx = AppContext::new(
            settings,
            Some(dir.path().join("config.toml")),
            DataPaths::new(dir.path()),
            Arc::new(NullHost),
            CancellationToken::new(),
        );
        ctx.client = TorrServerClient::with_base_url(base_url);
        ctx
    }

    fn hash_arg(hash: &str) -> HashArg {
        HashArg {
            hash: hash.to_string(),
        }
    }

    #[tokio::test]
    async fn test_torrents_lists() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/torrents")
            .match_body(Matcher::PartialJson(json!({"action": "list"})))
            .with_status(200)
            .with_body(json!([{"hash": HASH, "title": "One", "stat": 3}]).to_string())
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, &server.url(), Settings::default());
        let code = commands::run(Command::Torrents, &mut ctx, &QUIET).await;

        assert_eq!(code, ExitCode::Success);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_invalid_hash_rejected_before_request() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, "http://127.0.0.1:1", Settings::default());

        let code = commands::run(Command::Files(hash_arg("not-a-hash")), &mut ctx, &QUIET).await;
        assert_eq!(code, ExitCode::InvalidArgs);

        let code = commands::run(Command::Drop(hash_arg("abc")), &mut ctx, &QUIET).await;
        assert_eq!(code, ExitCode::InvalidArgs);
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_network_error() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, "http://127.0.0.1:1", Settings::default());

        let code = commands::run(Command::Echo, &mut ctx, &QUIET).await;
        assert_eq!(code, ExitCode::NetworkError);

        let code = commands::run(Command::Status(hash_arg(HASH)), &mut ctx, &QUIET).await;
        assert_eq!(code, ExitCode::NetworkError);
    }

    #[tokio::test]
    async fn test_status_uppercase_hash() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/stream")
            .match_query(Matcher::UrlEncoded("link".into(), HASH.into()))
            .with_status(200)
            .with_body(json!({"hash": HASH, "title": "One", "stat": 3}).to_string())
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, &server.url(), Settings::default());
        let code = commands::run(
            Command::Status(hash_arg(&HASH.to_uppercase())),
            &mut ctx,
            &QUIET,
        )
        .await;

        assert_eq!(code, ExitCode::Success);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_drop_posts_action() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/torrents")
            .match_body(Matcher::PartialJson(json!({"action": "drop", "hash": HASH})))
            .with_status(200)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, &server.url(), Settings::default());
        let code = commands::run(Command::Drop(hash_arg(HASH)), &mut ctx, &QUIET).await;

        assert_eq!(code, ExitCode::Success);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_play_without_candidates() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/stream")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "hash": HASH,
                    "stat": 3,
                    "file_stats": [{"id": 1, "path": "a/readme.txt", "length": 100}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, &server.url(), Settings::default());
        let code = commands::run(
            Command::Play(PlayCmd {
                hash: HASH.to_string(),
                no_buffer: false,
            }),
            &mut ctx,
            &QUIET,
        )
        .await;

        assert_eq!(code, ExitCode::NoCandidates);
    }

    #[tokio::test]
    async fn test_play_magnet_requires_magnet() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, "http://127.0.0.1:1", Settings::default());
        let code = commands::run(
            Command::PlayMagnet(PlaySourceCmd {
                source: "https://example.com/a.torrent".to_string(),
                title: None,
                no_buffer: false,
            }),
            &mut ctx,
            &QUIET,
        )
        .await;

        assert_eq!(code, ExitCode::InvalidArgs);
    }

    #[tokio::test]
    async fn test_settings_push_merges() {
        let mut server = Server::new_async().await;
        let get = server
            .mock("POST", "/settings")
            .match_body(Matcher::PartialJson(json!({"action": "get"})))
            .with_status(200)
            .with_body(json!({"CacheSize": 1, "PreloadCache": 50}).to_string())
            .create_async()
            .await;
        let set = server
            .mock("POST", "/settings")
            .match_body(Matcher::Json(json!({
                "action": "set",
                "sets": {"CacheSize": 2, "PreloadCache": 50}
            })))
            .with_status(200)
            .create_async()
            .await;

        let mut settings = Settings::default();
        settings
            .daemon_settings
            .insert("CacheSize".to_string(), toml::Value::Integer(2));

        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, &server.url(), settings);
        let code = commands::run(
            Command::Settings(SettingsCmd {
                action: SettingsAction::Push,
            }),
            &mut ctx,
            &QUIET,
        )
        .await;

        assert_eq!(code, ExitCode::Success);
        get.assert_async().await;
        set.assert_async().await;
    }
}
