use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use candle_core::Device;
use clap::{Parser, Subcommand};
use hydra::config::HydraConfig;
use hydra::encoder::load_encoder_config;
use hydra::logging::init_logging;
use hydra::search::{create_strategy, MultiTaskObjective, ObjectiveData, RunLabels, SearchLoop};
use hydra::training::data::{DataLoader, DataLoaderConfig, MultiTaskDataset};
use hydra::training::metrics::exporters::{begin_run, finish_run};
use hydra::training::metrics::{JsonLinesSink, MetricsSink, RunInfo, TracingSink};
use hydra::training::{predict, validate_task, Trainer, TrainingContext};
use hydra::{Coefficients, HydraNet, Task};
use serde_json::json;
use tracing::info;

#[derive(Parser)]
#[command(name = "hydra")]
#[command(about = "Multi-task fine-tuning with loss-weight search", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the loss coefficients maximising disaster F1
    Search {
        /// Configuration file (JSON or YAML)
        #[arg(short, long, env = "HYDRA_CONFIG")]
        config: Option<PathBuf>,

        /// Override the trial budget
        #[arg(long)]
        trials: Option<usize>,

        /// Write the search outcome as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Train one joint model with fixed coefficients
    Train {
        /// Configuration file (JSON or YAML)
        #[arg(short, long, env = "HYDRA_CONFIG")]
        config: Option<PathBuf>,

        /// Disaster loss weight
        #[arg(long, default_value_t = 0.5)]
        lambda1: f64,

        /// Sentiment loss weight
        #[arg(long, default_value_t = 0.5)]
        lambda2: f64,

        /// Save the trained parameters (safetensors)
        #[arg(short, long)]
        save: Option<PathBuf>,
    },

    /// Train a single-task baseline
    Baseline {
        /// Configuration file (JSON or YAML)
        #[arg(short, long, env = "HYDRA_CONFIG")]
        config: Option<PathBuf>,

        /// Task to train: 1 (disaster) or 2 (sentiment)
        #[arg(short, long)]
        task: u8,

        /// Save the trained parameters (safetensors)
        #[arg(short, long)]
        save: Option<PathBuf>,
    },

    /// Validate a configuration file
    Config {
        /// Configuration file to validate
        #[arg(short, long)]
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs)?;

    match cli.command {
        Commands::Search { config, trials, output } => run_search(config, trials, output),
        Commands::Train {
            config,
            lambda1,
            lambda2,
            save,
        } => run_train(config, lambda1, lambda2, save),
        Commands::Baseline { config, task, save } => run_baseline(config, task, save),
        Commands::Config { file } => validate_config(file),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<HydraConfig> {
    match path {
        Some(path) => HydraConfig::from_file(&path)
            .with_context(|| format!("Failed to load configuration file {}", path.display())),
        None => {
            info!("No configuration file given, using defaults");
            Ok(HydraConfig::default())
        }
    }
}

fn load_dataset(path: &Path) -> Result<MultiTaskDataset> {
    MultiTaskDataset::from_jsonl(path).with_context(|| format!("Failed to read dataset {}", path.display()))
}

fn create_sink(config: &HydraConfig) -> Result<Box<dyn MetricsSink>> {
    Ok(match &config.logging.metrics_path {
        Some(path) => Box::new(
            JsonLinesSink::new(path)
                .with_context(|| format!("Failed to open metrics file {}", path.display()))?,
        ),
        None => Box::new(TracingSink),
    })
}

fn model_builder(config: &HydraConfig) -> Result<impl FnMut(&Device) -> hydra::Result<HydraNet>> {
    let encoder_config = load_encoder_config(config.model.encoder_config.as_deref())
        .context("Failed to load encoder configuration")?;
    let model = config.model.clone();

    Ok(move |device: &Device| -> hydra::Result<HydraNet> {
        let net = HydraNet::new(&encoder_config, model.head_dropout, device)?;
        if let Some(weights) = &model.encoder_weights {
            net.load_pretrained(weights, model.weights_prefix.as_deref())?;
        }
        info!("Model ready: {} parameters", net.num_parameters());
        Ok(net)
    })
}

fn objective_data(config: &HydraConfig) -> Result<ObjectiveData> {
    let disaster_train = load_dataset(&config.data.disaster_train)?;
    let sentiment_train = load_dataset(&config.data.sentiment_train)?;
    let disaster_valid = load_dataset(&config.data.disaster_valid)?;
    let sentiment_valid = load_dataset(&config.data.sentiment_valid)?;

    let train = MultiTaskDataset::concat(disaster_train, sentiment_train)?;
    let valid = MultiTaskDataset::concat(disaster_valid.clone(), sentiment_valid)?;
    info!(
        "Combined datasets: {} training rows, {} validation rows",
        train.len(),
        valid.len()
    );

    Ok(ObjectiveData {
        train: Arc::new(train),
        valid: Arc::new(valid),
        disaster_valid: Arc::new(disaster_valid),
    })
}

fn run_labels(config: &HydraConfig) -> RunLabels {
    RunLabels {
        project: config.logging.project.clone(),
        group: config.logging.group.clone(),
    }
}

fn run_search(config_path: Option<PathBuf>, trials: Option<usize>, output: Option<PathBuf>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(trials) = trials {
        config.search.total_trials = trials;
    }
    config.validate().context("Invalid configuration")?;

    let device = config.model.device.to_device()?;
    let mut sink = create_sink(&config)?;
    let mut objective = MultiTaskObjective::new(
        config.search.objective_name.clone(),
        model_builder(&config)?,
        device,
        config.training.clone(),
        config.optimizer.clone(),
        objective_data(&config)?,
        run_labels(&config),
        sink.as_mut(),
    )?;

    let search = SearchLoop::new(
        config.search.space()?,
        config.search.direction(),
        config.search.total_trials,
    )?;
    let mut strategy = create_strategy(
        config.search.strategy,
        config.search.total_trials,
        config.search.bayesian.clone(),
    )?;
    info!(
        "Searching with {} strategy over {} trials",
        strategy.name(),
        config.search.total_trials
    );

    let outcome = search
        .run(&mut objective, strategy.as_mut())
        .context("Coefficient search failed")?;

    println!("{:?}", outcome.best_parameters());
    println!("{:?}", outcome.best_values());
    println!("{outcome}");

    if let Some(path) = output {
        std::fs::write(&path, serde_json::to_string_pretty(&outcome)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Search outcome saved to {}", path.display());
    }
    Ok(())
}

fn run_train(config_path: Option<PathBuf>, lambda1: f64, lambda2: f64, save: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let coefficients = Coefficients::new(lambda1, lambda2)?;
    let device = config.model.device.to_device()?;
    let data = objective_data(&config)?;
    let valid = Arc::clone(&data.valid);

    let mut sink = create_sink(&config)?;
    let mut objective = MultiTaskObjective::new(
        config.search.objective_name.clone(),
        model_builder(&config)?,
        device.clone(),
        config.training.clone(),
        config.optimizer.clone(),
        data,
        run_labels(&config),
        sink.as_mut(),
    )?;
    let run = objective.run(&coefficients)?;

    println!("Disaster (task 1) validation\n{}", run.disaster.report);

    let mut loader = DataLoader::new(
        valid,
        DataLoaderConfig::validation(config.training.valid_batch_size),
        device,
    )?;
    let predictions = predict(&run.model, &mut loader)?;
    println!(
        "Sentiment (task 2) validation\n{}",
        predictions.report(Task::Sentiment)
    );

    if let Some(path) = save {
        run.model.save(&path)?;
    }
    Ok(())
}

fn run_baseline(config_path: Option<PathBuf>, task_id: u8, save: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let task = Task::try_from(task_id)?;
    let device = config.model.device.to_device()?;

    let (train_path, valid_path) = match task {
        Task::Disaster => (&config.data.disaster_train, &config.data.disaster_valid),
        Task::Sentiment => (&config.data.sentiment_train, &config.data.sentiment_valid),
    };
    let mut train_loader = DataLoader::new(
        Arc::new(load_dataset(train_path)?.only(task)),
        DataLoaderConfig::train(config.training.train_batch_size, config.training.seed),
        device.clone(),
    )?;
    let mut valid_loader = DataLoader::new(
        Arc::new(load_dataset(valid_path)?.only(task)),
        DataLoaderConfig::validation(config.training.valid_batch_size),
        device.clone(),
    )?;

    let mut build = model_builder(&config)?;
    let model = build(&device)?;
    let mut sink = create_sink(&config)?;
    begin_run(
        sink.as_mut(),
        &RunInfo {
            project: config.logging.project.clone(),
            group: format!("baseline-{}", task),
            name: format!("baseline-{}", task),
            config: json!({
                "epochs": config.training.num_epochs,
                "batch_size": config.training.train_batch_size,
                "lr": config.optimizer.learning_rate,
                "optimizer": config.optimizer.optimizer_name(),
                "loss": "CrossEntropyLoss",
                "max_length": config.training.max_seq_length,
                "task": task.id(),
            }),
        },
    );

    let context = TrainingContext::new(
        &model,
        &config.optimizer,
        Coefficients::new(1.0, 1.0)?,
        sink.as_mut(),
        config.training.log_every,
    )?;
    let mut trainer = Trainer::new(&model, context);
    for epoch in 0..config.training.num_epochs {
        trainer.train_single_task(&mut train_loader, task, epoch)?;
    }
    drop(trainer);
    finish_run(sink.as_mut());

    let validation = validate_task(&model, &mut valid_loader, task)?;
    println!("{}", validation.report);
    match task {
        Task::Disaster => println!("F1 score: {:.4}", validation.report.binary_f1()),
        Task::Sentiment => println!("F1 score: {:.4}", validation.weighted_f1()),
    }

    if let Some(path) = save {
        model.save(&path)?;
    }
    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    info!("Validating configuration file: {}", config_path.display());

    let config = HydraConfig::from_file(&config_path).context("Failed to load configuration file")?;

    info!("Configuration is valid");
    info!("Configuration summary:");
    info!(
        "  - Training: {} epochs, batch size {}, lr {}",
        config.training.num_epochs, config.training.train_batch_size, config.optimizer.learning_rate
    );
    info!(
        "  - Search: {:?} strategy, {} trials, objective {}",
        config.search.strategy, config.search.total_trials, config.search.objective_name
    );
    info!(
        "  - Bounds: lambda1 {:?}, lambda2 {:?}",
        config.search.lambda1_bounds, config.search.lambda2_bounds
    );
    Ok(())
}
