use std::fs;
use training::{BackendKind, ConfigError, OptimizerKind, RunConfig, TrainArgs};

const FULL: &str = r#"
data_path = "data/data_subnet_output.npy"
init_path = "data/data_init_density.npy"
label_path = "data/label.npy"
lr = 0.001
momentum = 0.9
weight_decay = 0.0001
batch_size = 16
num_epochs = 40
split_ratio = 0.8
checkpoint_dir = "runs/check_point/uav"
model_checkpoint_name = "main_net"
optimizer = "sgd"
backend = "ndarray"
lr_step = 10
num_workers = 2
"#;

#[test]
fn file_supplies_every_required_value() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.toml");
    fs::write(&path, FULL).unwrap();

    let cfg = RunConfig::from_args(TrainArgs {
        config: Some(path),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(cfg.batch_size, 16);
    assert_eq!(cfg.num_epochs, 40);
    assert_eq!(cfg.optimizer, OptimizerKind::Sgd);
    assert_eq!(cfg.backend, BackendKind::NdArray);
    assert_eq!(cfg.lr_step, 10);
    assert_eq!(cfg.lr_gamma, RunConfig::DEFAULT_LR_GAMMA);
    assert_eq!(cfg.num_workers, 2);
    assert!(cfg.init_path.is_some());
    assert!(!cfg.eval_only);
}

#[test]
fn command_line_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.toml");
    fs::write(&path, FULL).unwrap();

    let cfg = RunConfig::from_args(TrainArgs {
        config: Some(path),
        lr: Some(0.05),
        batch_size: Some(4),
        optimizer: Some(OptimizerKind::Adam),
        eval_only: true,
        ..Default::default()
    })
    .unwrap();
    assert_eq!(cfg.lr, 0.05);
    assert_eq!(cfg.batch_size, 4);
    assert_eq!(cfg.optimizer, OptimizerKind::Adam);
    assert!(cfg.eval_only);
    assert_eq!(cfg.schedule().lr(10), 0.05 * 0.1);
}

#[test]
fn malformed_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "batch_size = \"many\"").unwrap();
    match RunConfig::from_args(TrainArgs {
        config: Some(path.clone()),
        ..Default::default()
    }) {
        Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn missing_file_is_a_read_error() {
    let err = RunConfig::from_args(TrainArgs {
        config: Some("/nonexistent/run.toml".into()),
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn file_values_are_validated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.toml");
    fs::write(&path, FULL.replace("split_ratio = 0.8", "split_ratio = 0.0")).unwrap();
    match RunConfig::from_args(TrainArgs {
        config: Some(path),
        ..Default::default()
    }) {
        Err(ConfigError::Invalid { name, .. }) => assert_eq!(name, "split_ratio"),
        other => panic!("expected invalid split_ratio, got {other:?}"),
    }
}
