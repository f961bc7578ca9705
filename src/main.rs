//! Command-line entry point: one subcommand per post-processing task.

use clap::{Parser, Subcommand};
use prstools::dist::{self, DistConfig};
use prstools::linear::{self, LinearConfig};
use prstools::reformat::{self, SumstatFormat};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(
    name = "prstools",
    version,
    about = "Post-processing toolkit for polygenic risk scores",
    long_about = "Reformat association summary statistics for PRS estimation, summarize a \
                  computed PRS across case/control groups, and evaluate a PRS against a \
                  continuous trait with a cross-validated linear model."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reformat association results into PRS-CS input format
    #[command(about = "Reformat sumstats (outputs: {out}.sumstats.prscs.txt)")]
    Reformat {
        /// Path to the tab-separated association results
        input: PathBuf,

        /// Source format: plink_v1 | plink_v2 | saige
        #[arg(long)]
        format: String,

        /// Output prefix
        #[arg(long, short)]
        out: String,
    },

    /// Summarize a PRS across case/control groups
    #[command(about = "PRS distribution summary (outputs: {out}_dist_summary.tsv, {out}_prs_dist.html)")]
    Dist {
        /// PRS score file (headerless; column 2 = IID, last column = score)
        #[arg(long, short = 'r')]
        prs: PathBuf,

        /// Phenotype file (headerless; columns: IID, case/control code)
        #[arg(long, short)]
        pheno: PathBuf,

        /// Phenotype name used in outputs
        #[arg(long, short = 'm')]
        phename: String,

        /// PRS normalization: none | z_std | min_max | arctan
        #[arg(long, short = 'a', default_value = "none")]
        normalize: String,

        /// Output prefix
        #[arg(long, short)]
        out: String,
    },

    /// Evaluate a PRS against a continuous trait
    #[command(about = "Linear-trait evaluation (outputs: importance/prediction tables and plots)")]
    Linear {
        /// Tab-separated phenotype table with a header row
        #[arg(long, short = 'i')]
        phenotable: PathBuf,

        /// Phenotype column name
        #[arg(long, short = 'm')]
        phename: String,

        /// PRS column name
        #[arg(long, short, default_value = "PRS")]
        prs: String,

        /// Train fraction of each stratum
        #[arg(long, short, default_value_t = 0.8)]
        ratio: f64,

        /// Agreement metric: pearsonr | rscore
        #[arg(long, short = 's', default_value = "pearsonr")]
        metrics: String,

        /// Covariate columns, e.g. "Sex,Age,PC1-10"
        #[arg(long, short = 'n', default_value = "")]
        covname: String,

        /// Stratification columns for the train/test split
        #[arg(long, default_value = "Sex,Age", value_delimiter = ',')]
        stratify_by: Vec<String>,

        /// Seed for the stratified split
        #[arg(long, default_value_t = 0)]
        split_seed: u64,

        /// Seed for the cross-validation folds
        #[arg(long, default_value_t = 2)]
        cv_seed: u64,

        /// Drop rows whose phenotype is missing or the -9 sentinel
        #[arg(long, short = 'g')]
        ignore_nan_pheno: bool,

        /// Drop the FID column if present
        #[arg(long, short = 'f')]
        fid_absent: bool,

        /// Standardize test features with train statistics instead of
        /// refitting the scaler on test
        #[arg(long)]
        no_refit_scaler: bool,

        /// Output prefix
        #[arg(long, short, default_value = "linear_plot")]
        out: String,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = match cli.command {
        Commands::Reformat { input, format, out } => (|| {
            let format: SumstatFormat = format.parse()?;
            let path = reformat::reformat_sumstats(&input, format, &out)?;
            println!("Saved to: {}", path.display());
            Ok(())
        })(),
        Commands::Dist {
            prs,
            pheno,
            phename,
            normalize,
            out,
        } => (|| {
            let config = DistConfig {
                score_path: prs,
                pheno_path: pheno,
                pheno_name: phename,
                normalize,
                out_prefix: out,
            };
            let path = dist::run(&config)?;
            println!("Saved to: {}", path.display());
            Ok(())
        })(),
        Commands::Linear {
            phenotable,
            phename,
            prs,
            ratio,
            metrics,
            covname,
            stratify_by,
            split_seed,
            cv_seed,
            ignore_nan_pheno,
            fid_absent,
            no_refit_scaler,
            out,
        } => (|| {
            let config = LinearConfig {
                pheno_path: phenotable,
                pheno_name: phename,
                prs_name: prs,
                ratio,
                covname,
                metric: metrics,
                out_prefix: out,
                stratify_by,
                split_seed,
                cv_seed,
                ignore_nan_pheno,
                fid_absent,
                refit_scaler: !no_refit_scaler,
            };
            linear::run(&config)?;
            Ok(())
        })(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
