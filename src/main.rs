mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};

use cli::{Cli, Command};
use stemgenre::audio::features::FeatureAssembler;
use stemgenre::config::{self, Config};
use stemgenre::model::{GenreClassifier, NormalizationStatistics, PredictionResult, PredictionService};
use stemgenre::pipeline::{AudioProcessor, PredictionRequest, PredictionResponse, ProcessResponse};
use stemgenre::separate::{CommandSeparator, DirectorySeparator, StemSeparator};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let mut cfg = config::resolve_config(cli.config.as_deref())?;
    // Flags and their environment variables win over the file
    if let Some(model) = cli.model {
        cfg.model.path = model;
    }
    if let Some(stats_dir) = cli.stats_dir {
        cfg.model.stats_dir = stats_dir;
    }

    match cli.command {
        Command::Process {
            input,
            output,
            stems_dir,
        } => {
            check_input(&input)?;
            let processor = build_processor(&cfg, stems_dir)?;
            let features = processor
                .process(&input)
                .with_context(|| format!("Failed to process {}", input.display()))?;
            write_json(&ProcessResponse::from_features(&features), output.as_deref())
        }
        Command::Predict { input, output } => {
            check_input(&input)?;
            let content = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let request: PredictionRequest = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse features from {}", input.display()))?;

            let service = build_service(&cfg)?;
            let result = service.predict(request.into_tensors()?)?;
            if output.is_some() {
                print_ranking(&input, &result, 3);
            }
            write_json(&PredictionResponse::new(&result), output.as_deref())
        }
        Command::Classify {
            inputs,
            stems_dir,
            top,
        } => {
            for input in &inputs {
                check_input(input)?;
            }
            let processor = build_processor(&cfg, stems_dir)?;
            let service = build_service(&cfg)?;
            if !service.is_loaded() {
                anyhow::bail!("No model loaded from {}", cfg.model.path.display());
            }
            classify_all(&processor, &service, &inputs, top)
        }
        Command::Serve { host, port } => {
            if let Some(host) = host {
                cfg.server.host = host;
            }
            if let Some(port) = port {
                cfg.server.port = port;
            }
            serve(cfg)
        }
    }
}

fn check_input(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Input file not found: {}", path.display());
    }
    Ok(())
}

fn build_processor(cfg: &Config, stems_dir: Option<PathBuf>) -> Result<AudioProcessor> {
    let separator: Box<dyn StemSeparator> = match stems_dir {
        Some(dir) => {
            log::info!("Using pre-separated stems from {}", dir.display());
            Box::new(DirectorySeparator::new(dir))
        }
        None => {
            log::info!("Separator: {} {}", cfg.separator.program, cfg.separator.args.join(" "));
            Box::new(CommandSeparator::new(
                cfg.separator.program.clone(),
                cfg.separator.args.clone(),
            ))
        }
    };

    let params = cfg.features.clone();
    log::info!(
        "Features: {} mels x {} frames (n_fft {}, hop {}, reference rate {} Hz)",
        params.n_mels,
        params.target_frames,
        params.n_fft,
        params.hop_length,
        params.sample_rate
    );
    let assembler = FeatureAssembler::new(params).context("Invalid [features] configuration")?;
    Ok(AudioProcessor::new(separator, assembler))
}

fn build_service(cfg: &Config) -> Result<PredictionService> {
    let shape = cfg.features.feature_shape();
    let stats = NormalizationStatistics::load_dir(&cfg.model.stats_dir, shape).with_context(|| {
        format!(
            "Failed to load normalization statistics from {}",
            cfg.model.stats_dir.display()
        )
    })?;
    Ok(PredictionService::new(load_classifier(cfg), stats, shape))
}

#[cfg(feature = "onnx")]
fn load_classifier(cfg: &Config) -> Option<Box<dyn GenreClassifier>> {
    match stemgenre::model::onnx::OnnxClassifier::load(&cfg.model.path, cfg.model.threads) {
        Ok(classifier) => Some(Box::new(classifier)),
        Err(err) => {
            log::warn!("Failed to load model: {}; predictions are disabled", err);
            None
        }
    }
}

#[cfg(not(feature = "onnx"))]
fn load_classifier(cfg: &Config) -> Option<Box<dyn GenreClassifier>> {
    log::warn!(
        "Model {} not loaded: ONNX support requires the 'onnx' feature. \
         Rebuild with: cargo build --features onnx",
        cfg.model.path.display()
    );
    None
}

fn classify_all(
    processor: &AudioProcessor,
    service: &PredictionService,
    inputs: &[PathBuf],
    top: usize,
) -> Result<()> {
    let pb = ProgressBar::new(inputs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} tracks {msg}")?
            .progress_chars("=>-"),
    );

    let mut results = Vec::with_capacity(inputs.len());
    for input in inputs {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        pb.set_message(name);
        results.push(processor.classify(input, service));
        pb.inc(1);
    }
    pb.finish_with_message("done");

    let mut failed = 0;
    for (input, result) in inputs.iter().zip(&results) {
        match result {
            Ok(result) => print_ranking(input, result, top),
            Err(err) => {
                failed += 1;
                println!("{}: failed: {}", input.display(), err);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} of {} tracks failed", failed, inputs.len());
    }
    Ok(())
}

fn print_ranking(input: &Path, result: &PredictionResult, top: usize) {
    println!("{}", input.display());
    for (rank, (genre, probability)) in result.top(top).iter().enumerate() {
        println!(
            "  {}. {:<12} {:<4} {:>6.1}%",
            rank + 1,
            genre.name(),
            genre.code(),
            probability * 100.0
        );
    }
    if !result.normalized {
        println!("  (features were not normalized)");
    }
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            log::info!("Wrote {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(feature = "server")]
fn serve(cfg: Config) -> Result<()> {
    use std::sync::Arc;

    let processor = Arc::new(build_processor(&cfg, None)?);
    let service = Arc::new(build_service(&cfg)?);
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(stemgenre::server::run_server(&cfg.server, processor, service))
}

#[cfg(not(feature = "server"))]
fn serve(_cfg: Config) -> Result<()> {
    anyhow::bail!(
        "HTTP support requires the 'server' feature. \
         Rebuild with: cargo build --features server"
    )
}
