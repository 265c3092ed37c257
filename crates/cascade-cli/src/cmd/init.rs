use super::Project;
use anyhow::Context;
use cascade_core::{config::Config, io, paths};

pub fn run(project: &Project) -> anyhow::Result<()> {
    let root = project.root();
    println!("Initializing cascade in: {}", root.display());

    let cascade_dir = paths::cascade_dir(root);
    io::ensure_dir(&cascade_dir)
        .with_context(|| format!("failed to create {}", cascade_dir.display()))?;

    let config_path = paths::config_path(root);
    if !config_path.exists() {
        let mut cfg = Config::default();
        if let Some(dir) = &project.artifacts_override {
            cfg.artifacts_dir = dir.clone();
        }
        cfg.save(root).context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }

    let config = project.config()?;
    let artifacts = project.artifacts_dir(&config);
    if artifacts.is_dir() {
        println!("  exists:  {}", config.artifacts_dir.display());
    } else {
        io::ensure_dir(&artifacts)
            .with_context(|| format!("failed to create {}", artifacts.display()))?;
        println!("  created: {}", config.artifacts_dir.display());
    }

    if config.executor.command.is_none() {
        println!();
        println!("Set executor.command in {} before `cascade run`.", paths::CONFIG_FILE);
    }
    Ok(())
}
