use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::Write;
use std::process;

use klotho::data::load_table;
use klotho::estimate::fit_kd_model;
use klotho::model::{AgeMode, KdModel, Method, PredictionSettings};
use klotho::phenoage::{PhenoAgeInputs, calculate_phenoage, ten_year_mortality_risk};
use klotho::reference::{Sex, nhanes_iii};

#[derive(Parser)]
#[clap(
    name = "klotho",
    version,
    about = "Biological age estimation from blood biomarkers (Klemera-Doubal and PhenoAge)."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fit a Klemera-Doubal model from a reference population table
    Fit(FitArgs),
    /// Estimate biological age for every row of a subject table
    Predict(PredictArgs),
    /// Print the per-biomarker diagnostics of a saved model
    Summary(SummaryArgs),
    /// Calculate PhenoAge from a full nine-biomarker panel plus age
    Phenoage(PhenoAgeArgs),
}

#[derive(Args)]
struct FitArgs {
    /// Path to a TSV file with one row per reference subject
    reference_data: String,

    /// Comma-separated biomarker column names to fit
    #[arg(long, value_delimiter = ',', required = true)]
    biomarkers: Vec<String>,

    /// Column holding chronological age
    #[arg(long, default_value = "age")]
    age_column: String,

    /// Where to save the fitted model (TOML); summary is printed either way
    #[arg(long)]
    output: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum PanelArg {
    Male,
    Female,
}

#[derive(Args)]
struct PredictArgs {
    /// Path to a TSV file with one row per subject
    subject_data: String,

    /// Path to a fitted model saved by `fit`
    #[arg(long, conflicts_with = "panel")]
    model: Option<String>,

    /// Use a published NHANES III reference panel instead of a fitted model
    #[arg(long, value_enum)]
    panel: Option<PanelArg>,

    /// Fold each subject's chronological age into the estimate
    #[arg(long)]
    include_age: bool,

    /// Override the chronological-age noise term (defaults to the model s_ba)
    #[arg(long, requires = "include_age")]
    s_ca: Option<f64>,

    /// Clamp estimates below this value
    #[arg(long, requires = "clamp_max")]
    clamp_min: Option<f64>,

    /// Clamp estimates above this value
    #[arg(long, requires = "clamp_min")]
    clamp_max: Option<f64>,

    /// Write the prediction table here (TSV); stdout if omitted
    #[arg(long)]
    output: Option<String>,
}

#[derive(Args)]
struct SummaryArgs {
    /// Path to a fitted model saved by `fit`
    model: String,
}

#[derive(Args)]
struct PhenoAgeArgs {
    /// Albumin, g/dL
    #[arg(long)]
    albumin: f64,
    /// Creatinine, mg/dL
    #[arg(long)]
    creatinine: f64,
    /// Glucose, mg/dL
    #[arg(long)]
    glucose: f64,
    /// Natural log of C-reactive protein, log(mg/L)
    #[arg(long)]
    log_crp: f64,
    /// Lymphocyte percent
    #[arg(long)]
    lymphocyte_percent: f64,
    /// Mean cell volume, fL
    #[arg(long)]
    mean_cell_volume: f64,
    /// Red cell distribution width, percent
    #[arg(long)]
    red_cell_distribution_width: f64,
    /// Alkaline phosphatase, U/L
    #[arg(long)]
    alkaline_phosphatase: f64,
    /// White blood cell count, 1000 cells/uL
    #[arg(long)]
    white_blood_cell_count: f64,
    /// Chronological age, years
    #[arg(long)]
    chronological_age: f64,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Fit(args) => run_fit(&args),
        Command::Predict(args) => run_predict(&args),
        Command::Summary(args) => run_summary(&args),
        Command::Phenoage(args) => run_phenoage(&args),
    };
    if let Err(error) = result {
        eprintln!("error: {error}");
        process::exit(1);
    }
}

fn run_fit(args: &FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut required = vec![args.age_column.clone()];
    required.extend(args.biomarkers.iter().cloned());
    let table = load_table(&args.reference_data, &required, &[])?;

    let model = fit_kd_model(&table, &args.biomarkers, &args.age_column)?;
    println!("{}", model.summary()?);
    println!("s_ba = {}", model.s_ba);

    if let Some(path) = &args.output {
        model.save(path)?;
        log::info!("Saved fitted model to '{path}'");
    }
    Ok(())
}

fn run_predict(args: &PredictArgs) -> Result<(), Box<dyn std::error::Error>> {
    let model = match (&args.model, args.panel) {
        (Some(path), None) => KdModel::load(path)?,
        (None, Some(PanelArg::Male)) => nhanes_iii(Sex::Male).to_model(),
        (None, Some(PanelArg::Female)) => nhanes_iii(Sex::Female).to_model(),
        _ => return Err("exactly one of --model or --panel is required".into()),
    };

    let mut required = model.biomarkers.clone();
    let mut optional = Vec::new();
    if args.include_age {
        required.push(model.age_column.clone());
    } else {
        // Still load the age column when present: the output reports the
        // aging pace (biological minus chronological age) whenever it can.
        optional.push(model.age_column.clone());
    }
    let table = load_table(&args.subject_data, &required, &optional)?;

    let settings = PredictionSettings {
        age_mode: if args.include_age {
            AgeMode::WithChronologicalAge { s_ca: args.s_ca }
        } else {
            AgeMode::BiomarkersOnly
        },
        clamp: match (args.clamp_min, args.clamp_max) {
            (Some(low), Some(high)) if low <= high => Some((low, high)),
            (Some(low), Some(high)) => {
                return Err(format!("--clamp-min {low} exceeds --clamp-max {high}").into());
            }
            _ => None,
        },
    };

    let estimates = model.predict_table(&table, &settings)?;
    let ages = table.column(&model.age_column);

    let writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(std::io::stdout()),
    };
    let mut tsv = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    let method = match estimates.first().map(|e| e.method) {
        Some(Method::KdWithChronologicalAge) => "kd_with_chronological_age",
        _ => "kd",
    };
    if ages.is_some() {
        tsv.write_record([
            "row",
            "method",
            "biological_age",
            "chronological_age",
            "aging_pace",
        ])?;
    } else {
        tsv.write_record(["row", "method", "biological_age"])?;
    }
    for (row, estimate) in estimates.iter().enumerate() {
        match ages {
            Some(ages) => tsv.write_record([
                (row + 1).to_string(),
                method.to_string(),
                estimate.value.to_string(),
                ages[row].to_string(),
                (estimate.value - ages[row]).to_string(),
            ])?,
            None => tsv.write_record([
                (row + 1).to_string(),
                method.to_string(),
                estimate.value.to_string(),
            ])?,
        }
    }
    tsv.flush()?;
    Ok(())
}

fn run_summary(args: &SummaryArgs) -> Result<(), Box<dyn std::error::Error>> {
    let model = KdModel::load(&args.model)?;
    println!("{}", model.summary()?);
    println!("s_ba = {}", model.s_ba);
    Ok(())
}

fn run_phenoage(args: &PhenoAgeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let inputs = PhenoAgeInputs {
        albumin: args.albumin,
        creatinine: args.creatinine,
        glucose: args.glucose,
        log_crp: args.log_crp,
        lymphocyte_percent: args.lymphocyte_percent,
        mean_cell_volume: args.mean_cell_volume,
        red_cell_distribution_width: args.red_cell_distribution_width,
        alkaline_phosphatase: args.alkaline_phosphatase,
        white_blood_cell_count: args.white_blood_cell_count,
        chronological_age: args.chronological_age,
    };
    let value = calculate_phenoage(&inputs)?;
    println!("phenoage_years\t{value}");
    println!(
        "ten_year_mortality_risk\t{}",
        ten_year_mortality_risk(&inputs)
    );
    Ok(())
}
