// NOTE / REMINDER: Setting env vars in tests will clobber env vars in other tests. This means that
// each test *must* use a unique prefix for its environment variables to ensure they don't clobber
// other tests.

use std::{path::PathBuf, time::Duration};

use clap::Parser as _;
use figment::Jail;

use crate::{
    settings::{Args, ModemConfig, Settings},
    usb::UsbId,
};

const CFG_FILE_CONTENTS: &str = r#"
    test_hosts = ["10.0.0.1"]
    test_interval = 120
    connection_timeout = 90
    at_port = "/config/ttyUSB2"
    restart_modem = false

    [[modems]]
    name = "Huawei"
    netdev = "wwan0"
    vendor_product = "12d1:1506"
"#;

fn make_args(args: &str) -> Result<Args, clap::Error> {
    Args::try_parse_from(str::split_ascii_whitespace(args))
}

#[test]
fn defaults_apply_without_config_file_or_env() {
    Jail::expect_with(|_jail| {
        let args = make_args("modemd").unwrap();

        let settings = Settings::get(&args, "missing.toml", "MODEMD_DEFAULTS_")?;

        assert_eq!(settings, Settings::default());
        Ok(())
    });
}

#[test]
fn config_file_overrides_defaults() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", CFG_FILE_CONTENTS)?;
        let args = make_args("modemd").unwrap();

        let settings = Settings::get(&args, "config.toml", "MODEMD_FILE_")?;

        assert_eq!(settings.test_hosts, vec!["10.0.0.1".to_string()]);
        assert_eq!(settings.test_interval, Duration::from_secs(120));
        assert_eq!(settings.connection_timeout, Duration::from_secs(90));
        assert_eq!(settings.at_port, PathBuf::from("/config/ttyUSB2"));
        assert_eq!(
            settings.modems,
            vec![ModemConfig {
                name: "Huawei".into(),
                netdev: "wwan0".into(),
                vendor_product: UsbId::new(0x12d1, 0x1506),
            }]
        );
        // untouched keys keep their defaults
        assert_eq!(settings.sim_check_retries, Settings::default().sim_check_retries);
        Ok(())
    });
}

#[test]
fn env_vars_override_config_file() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", CFG_FILE_CONTENTS)?;
        jail.set_env("MODEMD_ENV_TEST_INTERVAL", "30");
        jail.set_env("MODEMD_ENV_AT_PORT", "/env/ttyUSB3");
        jail.set_env("MODEMD_ENV_RESTART_MODEM", "true");
        let args = make_args("modemd").unwrap();

        let settings = Settings::get(&args, "config.toml", "MODEMD_ENV_")?;

        assert_eq!(settings.test_interval, Duration::from_secs(30));
        assert_eq!(settings.at_port, PathBuf::from("/env/ttyUSB3"));
        assert!(settings.restart_modem);
        assert_eq!(settings.connection_timeout, Duration::from_secs(90));
        Ok(())
    });
}

#[test]
fn cli_args_override_config_file_and_env_vars() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", CFG_FILE_CONTENTS)?;
        jail.set_env("MODEMD_CLI_TEST_INTERVAL", "30");
        jail.set_env("MODEMD_CLI_AT_PORT", "/env/ttyUSB3");
        let args = make_args(
            "modemd --config config.toml --at-port /args/ttyUSB4 --restart --test-interval 15",
        )
        .unwrap();

        let settings = Settings::get(&args, "config.toml", "MODEMD_CLI_")?;

        assert_eq!(settings.test_interval, Duration::from_secs(15));
        assert_eq!(settings.at_port, PathBuf::from("/args/ttyUSB4"));
        assert!(settings.restart_modem);
        Ok(())
    });
}

#[test]
fn unset_cli_flag_does_not_clobber_config_file() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
            restart_modem = true
            "#,
        )?;
        let args = make_args("modemd").unwrap();

        let settings = Settings::get(&args, "config.toml", "MODEMD_FLAG_")?;

        assert!(settings.restart_modem);
        Ok(())
    });
}

#[test]
fn malformed_vendor_product_is_rejected() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
            [[modems]]
            name = "Broken"
            netdev = "usb0"
            vendor_product = "1e0e-9018"
            "#,
        )?;
        let args = make_args("modemd").unwrap();

        let result = Settings::get(&args, "config.toml", "MODEMD_BAD_");

        let err = result.unwrap_err().to_string();
        assert!(err.contains("1e0e-9018"), "{err}");
        Ok(())
    });
}
