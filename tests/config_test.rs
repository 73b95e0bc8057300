/// Integration tests for configuration loading and saving

mod config_tests {
    use postgate::config::{load_config_from, save_config, InvalidTokenPolicy, SimpleCollections};
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_full_config_roundtrip_through_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(
                br#"
[database]
url = "postgres://authenticator:pw@localhost/app"
owner_url = "postgres://owner:pw@localhost/app"
schemas = ["app_public"]
statement_timeout_ms = 5000

[auth]
default_role = "app_anonymous"
jwt_secret = "s3cret"
jwt_token_type = "app_public.jwt_token"
invalid_token = "anonymous"

[watch]
interval_secs = 30
install_triggers = true

[inflection]
plugins = ["simplify", "strip-table-prefix:tbl_"]
simple_collections = "only"

[limits]
default_page_size = 20
max_page_size = 200
"#,
            )
            .unwrap();
        temp_file.flush().unwrap();

        let path = temp_file.path().to_str().unwrap();
        let config = load_config_from(path, HashMap::new()).unwrap();
        assert_eq!(config.auth.invalid_token, InvalidTokenPolicy::Anonymous);
        assert_eq!(config.inflection.simple_collections, SimpleCollections::Only);
        assert_eq!(config.watch.interval_secs, 30);
        assert_eq!(config.limits.max_page_size, 200);
        assert_eq!(
            config.database.introspection_url(),
            "postgres://owner:pw@localhost/app"
        );

        let saved = NamedTempFile::new().unwrap();
        let saved_path = saved.path().to_str().unwrap();
        save_config(&config, saved_path).unwrap();
        let reloaded = load_config_from(saved_path, HashMap::new()).unwrap();
        assert_eq!(reloaded.database.schemas, config.database.schemas);
        assert_eq!(reloaded.auth.jwt_token_type, config.auth.jwt_token_type);
        assert_eq!(reloaded.inflection.plugins, config.inflection.plugins);
    }

    #[test]
    fn test_inconsistent_page_sizes_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(
                br#"
[database]
url = "postgres://localhost/app"

[limits]
default_page_size = 500
max_page_size = 100
"#,
            )
            .unwrap();
        temp_file.flush().unwrap();

        let result = load_config_from(temp_file.path().to_str().unwrap(), HashMap::new());
        assert!(result.is_err());
    }
}
