use std::io::Write;

use anyhow::Result;

use detect_streamer::{PipelineConfig, PipelineConfigFile, TransportStrategy};

#[test]
fn json_file_overrides_only_the_fields_it_names() -> Result<()> {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile()?;
    write!(
        file,
        r#"{{ "model_path": "stub://person,car", "port": 7000, "tracking_enabled": false }}"#
    )?;
    let cfg = PipelineConfig::from_path(file.path())?;

    assert_eq!(cfg.model_path, "stub://person,car");
    assert_eq!(cfg.port, 7000);
    assert!(!cfg.tracking_enabled);
    let defaults = PipelineConfig::default();
    assert_eq!(cfg.host, defaults.host);
    assert_eq!(cfg.width, defaults.width);
    assert_eq!(cfg.bitrate_kbps, defaults.bitrate_kbps);
    Ok(())
}

#[test]
fn command_line_layer_wins_over_file() -> Result<()> {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
    writeln!(file, "host = \"10.1.1.1\"\nfps = 10\nheadless = false")?;
    let mut cfg = PipelineConfig::from_path(file.path())?;

    cfg.apply_file(PipelineConfigFile {
        fps: Some(25),
        headless: Some(true),
        ..PipelineConfigFile::default()
    });
    cfg.validate()?;

    assert_eq!(cfg.host, "10.1.1.1");
    assert_eq!(cfg.fps, 25);
    assert!(cfg.headless);
    assert!(!cfg.presents_preview());
    Ok(())
}

#[test]
fn invalid_values_in_file_are_rejected() -> Result<()> {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile()?;
    write!(file, r#"{{ "fps": 0 }}"#)?;
    assert!(PipelineConfig::from_path(file.path()).is_err());

    let mut file = tempfile::Builder::new().suffix(".json").tempfile()?;
    write!(file, r#"{{ "iou_threshold": 2.0 }}"#)?;
    assert!(PipelineConfig::from_path(file.path()).is_err());
    Ok(())
}

#[test]
fn missing_file_is_an_error() {
    let err = PipelineConfig::from_path(std::path::Path::new("/nonexistent/streamer.json"))
        .expect_err("missing file");
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn transport_strategy_names() -> Result<()> {
    assert_eq!("auto".parse::<TransportStrategy>()?, TransportStrategy::Auto);
    assert_eq!("ffmpeg".parse::<TransportStrategy>()?, TransportStrategy::Process);
    assert_eq!("preview".parse::<TransportStrategy>()?, TransportStrategy::None);
    assert!("carrier-pigeon".parse::<TransportStrategy>().is_err());
    Ok(())
}
