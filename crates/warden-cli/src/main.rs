use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use warden_core::{
    CancelToken, DatasetStore, EnrollmentSession, FrameSource, IdentityStore, SeetaDetector,
    SessionBudget, StillSource, Subject, SubjectMetadata, TrainError, TrainedModel, Trainer,
    VerificationSession,
};
use warden_hw::Camera;

mod config;
mod observer;
mod store;

use config::Config;
use observer::TerminalObserver;
use store::SqliteIdentityStore;

#[derive(Parser)]
#[command(name = "warden", version, about = "Face-verified access gate")]
struct Cli {
    /// TOML configuration file (overrides WARDEN_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a subject and capture face samples
    Enroll {
        /// Full name of the subject
        #[arg(short, long)]
        name: String,
        /// Registration number
        #[arg(long)]
        reg_no: Option<String>,
        /// Year of study
        #[arg(long)]
        year: Option<u16>,
        /// Number of samples to capture
        #[arg(short, long)]
        samples: Option<u32>,
        /// Enroll from image files instead of the camera
        #[arg(long, num_args = 1..)]
        image: Vec<PathBuf>,
    },
    /// Train the recognizer on every enrolled sample
    Train,
    /// Verify the face in front of the camera
    Verify {
        /// Verify image files instead of the camera
        #[arg(long, num_args = 1..)]
        image: Vec<PathBuf>,
    },
    /// List enrolled subjects
    List,
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Enroll {
            name,
            reg_no,
            year,
            samples,
            image,
        } => enroll(config, name, SubjectMetadata { reg_no, year }, samples, image).await,
        Commands::Train => train(&config),
        Commands::Verify { image } => verify(config, image).await,
        Commands::List => list(&config),
        Commands::Devices => devices(),
    }
}

/// Run a session on a blocking worker while Ctrl-C flips `cancel`.
async fn run_blocking<T, F>(cancel: CancelToken, job: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling session");
            cancel.cancel();
        }
    });
    let result = tokio::task::spawn_blocking(job).await;
    watcher.abort();
    result.context("session worker panicked")?
}

fn load_detector(config: &Config) -> Result<SeetaDetector> {
    SeetaDetector::load(&config.detector_model.to_string_lossy(), config.detector.clone())
        .with_context(|| format!("cannot load face detector {}", config.detector_model.display()))
}

/// Camera by default; the given image files when there are any.
fn frame_source(config: &Config, images: &[PathBuf]) -> Box<dyn FrameSource> {
    if images.is_empty() {
        Box::new(Camera::new(config.camera.clone()))
    } else {
        Box::new(StillSource::from_paths(images))
    }
}

async fn enroll(
    config: Config,
    name: String,
    metadata: SubjectMetadata,
    samples: Option<u32>,
    images: Vec<PathBuf>,
) -> Result<ExitCode> {
    let name = name.trim().to_string();
    if name.is_empty() {
        bail!("name must not be empty");
    }
    let target = samples.unwrap_or(if images.is_empty() {
        config.samples_per_enroll
    } else {
        images.len() as u32
    });
    if target == 0 {
        bail!("--samples must be at least 1");
    }

    let cancel = CancelToken::new();
    let session = EnrollmentSession::new(target).with_cancel(cancel.clone());
    let session = if images.is_empty() {
        session
    } else {
        session.with_budget(SessionBudget::frames(images.len() as u32))
    };

    let report = run_blocking(cancel, move || {
        let mut store = DatasetStore::open(&config.dataset_dir)?;
        let mut identities = SqliteIdentityStore::open(&config.db_path)?;
        let mut detector = load_detector(&config)?;
        let (subject, registered) = resolve_subject(&store, &mut identities, &name, &metadata)?;

        let result = session.run(
            frame_source(&config, &images),
            &mut detector,
            &mut store,
            &subject,
            &mut TerminalObserver::default(),
        );

        if registered {
            if let Err(e) = discard_unused(&store, &mut identities, &subject) {
                tracing::error!(error = %e, id = %subject.id, "identity record left without samples");
                if result.is_ok() {
                    return Err(e);
                }
            }
        }
        Ok(result?)
    })
    .await?;

    let captured = report.entries.len();
    if captured == 0 {
        println!("No samples captured for {}.", report.subject.name);
        return Ok(ExitCode::FAILURE);
    }
    println!(
        "Stored {captured}/{} samples for {} ({}). Run `warden train` to update the model.",
        report.target, report.subject.name, report.subject.id
    );
    Ok(if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// The enrolled subject called `name`, or a freshly registered one. The
/// flag is set when a registration was created.
fn resolve_subject(
    store: &DatasetStore,
    identities: &mut dyn IdentityStore,
    name: &str,
    metadata: &SubjectMetadata,
) -> Result<(Subject, bool)> {
    if let Some(subject) = store.find_subject(name) {
        return Ok((subject, false));
    }
    let id = identities.create_subject(name, metadata)?;
    Ok((Subject::with_id(id, name), true))
}

/// Drop the registration of `subject` if the dataset holds none of its
/// samples.
fn discard_unused(
    store: &DatasetStore,
    identities: &mut dyn IdentityStore,
    subject: &Subject,
) -> Result<()> {
    if store.subjects().iter().any(|s| s.id == subject.id) {
        return Ok(());
    }
    identities
        .remove(subject.id)
        .with_context(|| format!("failed to remove unused registration {}", subject.id))
}

fn train(config: &Config) -> Result<ExitCode> {
    let store = DatasetStore::open(&config.dataset_dir)?;
    let entries = store.entries()?;

    let model = match Trainer::new(config.lbph).train(&entries) {
        Err(TrainError::NoTrainingData) => {
            bail!("no face samples enrolled yet; run `warden enroll` first")
        }
        other => other?,
    };
    model.save(&config.model_path)?;

    println!(
        "Trained on {} samples of {} subjects -> {}",
        model.samples().len(),
        model.registry().len(),
        config.model_path.display()
    );
    Ok(ExitCode::SUCCESS)
}

async fn verify(config: Config, images: Vec<PathBuf>) -> Result<ExitCode> {
    let model = TrainedModel::load(&config.model_path)
        .context("no usable model; run `warden train` first")?;

    let budget = if images.is_empty() {
        config.verify_budget()
    } else {
        SessionBudget::frames(images.len() as u32)
    };
    let cancel = CancelToken::new();
    let session = VerificationSession::new(config.admit_threshold)
        .with_budget(budget)
        .with_cancel(cancel.clone());

    let report = run_blocking(cancel, move || {
        let mut detector = load_detector(&config)?;
        Ok(session.run(
            frame_source(&config, &images),
            &mut detector,
            &model,
            &mut TerminalObserver::default(),
        )?)
    })
    .await?;

    tracing::debug!(
        frames = report.frames,
        best_score = report.best_score(),
        "verification report"
    );
    Ok(if report.outcome.is_admit() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn list(config: &Config) -> Result<ExitCode> {
    let store = DatasetStore::open(&config.dataset_dir)?;
    if store.subjects().is_empty() {
        println!("No subjects enrolled");
        return Ok(ExitCode::SUCCESS);
    }
    let identities = SqliteIdentityStore::open(&config.db_path)?;

    println!("{:<24} {:>7}  {:<12} {:>4}  ID", "NAME", "SAMPLES", "REG NO", "YEAR");
    for record in store.subjects() {
        let metadata = identities
            .get(record.id)?
            .map(|r| r.metadata)
            .unwrap_or_default();
        println!(
            "{:<24} {:>7}  {:<12} {:>4}  {}",
            record.name,
            record.samples,
            metadata.reg_no.as_deref().unwrap_or("-"),
            metadata.year.map_or_else(|| "-".to_string(), |y| y.to_string()),
            record.id
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn devices() -> Result<ExitCode> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
    Ok(ExitCode::SUCCESS)
}
