use clap::{Args, Parser, Subcommand, ValueEnum};
use const_default::ConstDefault;
use macro_at_k::optimize::{coverage, precision, weighted};
use macro_at_k::{data, metrics, weights, DenseVec, Error, HyperParam, Solution, SparseMat};
use serde::Serialize;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Select k labels per instance from predicted label probabilities
    Predict(PredictArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Method {
    /// Top-k by probability; optimal for instance-wise precision
    InstancePrec,
    /// Top-k by probability times inverse propensity
    InvPropensity,
    /// Top-k by probability times marginal^-beta
    PowerLaw,
    /// Top-k by probability times -log(marginal)
    Log,
    /// Top-k by probability times marginal^-1/2
    Sqrt,
    /// Top-k by probability divided by marginal; optimal for macro recall
    MacroRecall,
    /// Block coordinate ascent on macro precision
    BcaPrec,
    /// Block coordinate ascent on macro recall
    BcaRecall,
    /// Block coordinate ascent on macro F1
    BcaF1,
    /// Block coordinate ascent on coverage
    BcaCov,
    /// Single greedy pass on coverage
    GreedyCov,
    /// Block coordinate ascent on a mix of macro and instance precision
    MixedPrec,
    /// Block coordinate ascent on a mix of macro F1 and instance precision
    MixedF1,
    /// Block coordinate ascent on a mix of coverage and instance precision
    MixedCov,
}

impl Method {
    fn needs_label_counts(self) -> bool {
        matches!(
            self,
            Self::InvPropensity | Self::PowerLaw | Self::Log | Self::Sqrt | Self::MacroRecall
        )
    }
}

#[derive(Args)]
#[command(rename_all = "snake_case")]
struct PredictArgs {
    /// Path to predictions file
    ///
    /// Each line holds the space-separated label:probability pairs of one instance.
    #[arg(required = true)]
    predictions_path: PathBuf,

    /// Selection method
    #[arg(value_enum, long, default_value_t = Method::InstancePrec)]
    method: Method,

    /// Number of labels in the predictions
    ///
    /// If not given, one more than the largest label in the predictions file.
    #[arg(long)]
    n_labels: Option<usize>,

    /// Path to training dataset file, used to estimate label marginals and propensities
    ///
    /// The dataset file is expected to be in the format of the Extreme Classification
    /// Repository.
    #[arg(long)]
    train_labels: Option<PathBuf>,

    /// Number of labels selected for each instance
    #[arg(long, default_value_t = HyperParam::DEFAULT.k)]
    k: usize,

    /// Random seed for initialization and instance orders
    #[arg(long, default_value_t = HyperParam::DEFAULT.seed)]
    seed: u64,

    /// Stop once a pass improves the objective by no more than this
    #[arg(long, default_value_t = HyperParam::DEFAULT.tolerance)]
    tolerance: f32,

    /// Maximum number of passes
    #[arg(long, value_name = "N")]
    max_iter: Option<usize>,

    /// Floor added to predicted-positive counts
    #[arg(long, default_value_t = HyperParam::DEFAULT.epsilon)]
    epsilon: f32,

    /// Start from an empty assignment instead of a random one
    #[arg(long)]
    greedy_start: bool,

    /// Weight of instance precision in the mixed objectives
    #[arg(long, default_value_t = 0.5)]
    alpha: f32,

    /// Exponent of the power-law weights
    #[arg(long, default_value_t = 0.5)]
    beta: f32,

    /// Decay of accumulated coverage in the greedy coverage pass
    #[arg(long, default_value_t = 1.)]
    decay: f32,

    /// Show a progress bar for each pass
    #[arg(long)]
    show_progress: bool,

    /// Number of worker threads
    ///
    /// If 0, the number is selected automatically.
    #[arg(long, default_value_t = 0)]
    n_threads: usize,

    /// Path to the which selected labels will be written, if provided
    #[arg(long)]
    out_path: Option<PathBuf>,
}

impl From<&PredictArgs> for HyperParam {
    fn from(args: &PredictArgs) -> Self {
        HyperParam {
            k: args.k,
            tolerance: args.tolerance,
            max_iter: args.max_iter,
            epsilon: args.epsilon,
            greedy_start: args.greedy_start,
            seed: args.seed,
            show_progress: args.show_progress,
        }
    }
}

#[derive(Serialize)]
struct Summary {
    method: String,
    iterations: usize,
    converged: bool,
    objective: f32,
    instance_precision: f32,
    macro_precision: f32,
    macro_recall: f32,
    macro_f1: f32,
    coverage: f32,
}

impl Summary {
    fn new(
        method: Method,
        preds: &SparseMat,
        solution: &Solution,
        epsilon: f32,
    ) -> macro_at_k::Result<Self> {
        let assignment = &solution.assignment;
        Ok(Self {
            method: format!("{:?}", method),
            iterations: solution.iterations,
            converged: solution.converged,
            objective: solution.objective,
            instance_precision: metrics::instance_precision(preds, assignment)?,
            macro_precision: metrics::macro_precision(preds, assignment, epsilon)?,
            macro_recall: metrics::macro_recall(preds, assignment, epsilon)?,
            macro_f1: metrics::macro_f1(preds, assignment, epsilon)?,
            coverage: metrics::coverage(preds, assignment)?,
        })
    }
}

fn set_num_threads(num_threads: usize) {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .unwrap();
}

type LabelCounts = (Vec<usize>, usize);

/// Load the predictions and, if a training file is given, its label counts.
///
/// Without `--n_labels`, the label count in the training file header sizes the prediction matrix.
fn load_inputs(args: &PredictArgs) -> macro_at_k::Result<(SparseMat, Option<LabelCounts>)> {
    let label_counts = match &args.train_labels {
        Some(path) => Some(data::load_label_counts(path)?),
        None if args.method.needs_label_counts() => {
            return Err(Error::InvalidHyperParam(format!(
                "--train_labels is required by method {:?}",
                args.method
            )))
        }
        None => None,
    };
    let n_labels = args
        .n_labels
        .or_else(|| label_counts.as_ref().map(|(counts, _)| counts.len()));
    let preds = data::load_sparse_predictions(&args.predictions_path, n_labels)?;
    Ok((preds, label_counts))
}

fn select(
    args: &PredictArgs,
    preds: &SparseMat,
    label_counts: Option<&LabelCounts>,
) -> macro_at_k::Result<Solution> {
    let hyper_param = HyperParam::from(args);
    hyper_param.validate()?;
    if args.method.needs_label_counts() && label_counts.is_none() {
        return Err(Error::InvalidHyperParam(format!(
            "--train_labels is required by method {:?}",
            args.method
        )));
    }
    let marginals = label_counts
        .map(|(counts, n)| weights::label_priors(counts, *n))
        .unwrap_or_else(|| DenseVec::zeros(0));
    let k = args.k;

    match args.method {
        Method::InstancePrec => weighted::optimal_instance_precision(preds, k),
        Method::InvPropensity => {
            let (counts, n) = label_counts.map_or((&[][..], 0), |(c, n)| (c.as_slice(), *n));
            let inv_ps = weights::jpv_inverse_propensity(counts, n, weights::JPV_A, weights::JPV_B);
            weighted::inv_propensity_weighted_instance(preds, inv_ps.view(), k)
        }
        Method::PowerLaw => {
            weighted::power_law_weighted_instance(preds, marginals.view(), k, args.beta)
        }
        Method::Log => weighted::log_weighted_instance(preds, marginals.view(), k),
        Method::Sqrt => weighted::sqrt_weighted_instance(preds, marginals.view(), k),
        Method::MacroRecall => weighted::optimal_macro_recall(preds, marginals.view(), k),
        Method::BcaPrec => precision::block_coordinate_macro_precision(preds, &hyper_param),
        Method::BcaRecall => precision::block_coordinate_macro_recall(preds, &hyper_param),
        Method::BcaF1 => precision::block_coordinate_macro_f1(preds, &hyper_param),
        Method::BcaCov => coverage::block_coordinate_coverage(preds, &hyper_param),
        Method::GreedyCov => coverage::greedy_coverage(preds, k, args.decay, Some(args.seed)),
        Method::MixedPrec => {
            precision::block_coordinate_mixed_precision(preds, args.alpha, &hyper_param)
        }
        Method::MixedF1 => precision::block_coordinate_mixed_f1(preds, args.alpha, &hyper_param),
        Method::MixedCov => {
            coverage::block_coordinate_mixed_coverage(preds, args.alpha, &hyper_param)
        }
    }
}

fn predict(args: &PredictArgs) -> macro_at_k::Result<()> {
    set_num_threads(args.n_threads);

    let (preds, label_counts) = load_inputs(args)?;
    let solution = select(args, &preds, label_counts.as_ref())?;
    if let Some(out_path) = args.out_path.as_ref() {
        data::save_assignment(out_path, &solution.assignment)?;
    }

    let summary = Summary::new(args.method, &preds, &solution, args.epsilon)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).expect("Failed to serialize summary")
    );
    Ok(())
}

fn main() {
    simple_logger::init_with_level(log::Level::Info).unwrap();
    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Predict(args) => predict(args),
    };
    if let Err(e) = result {
        log::error!("{}", e);
        process::exit(1);
    }
}

#[test]
fn verify_cli() {
    use clap::CommandFactory;
    Cli::command().debug_assert();
}

#[cfg(test)]
fn parse_predict_args(args: &[&str]) -> PredictArgs {
    let cli = Cli::try_parse_from(["macro-at-k", "predict"].iter().chain(args).copied()).unwrap();
    let Commands::Predict(args) = cli.command;
    args
}

#[test]
fn test_select_rejects_non_positive_epsilon() {
    let preds = SparseMat::new((2, 3), vec![0, 1, 2], vec![0, 2], vec![0.5, 0.7]);
    for method in ["instance-prec", "bca-prec", "greedy-cov"] {
        let args = parse_predict_args(&[
            "preds.txt",
            "--method",
            method,
            "--k",
            "1",
            "--epsilon",
            "0",
        ]);
        assert!(matches!(
            select(&args, &preds, None),
            Err(Error::InvalidHyperParam(_))
        ));
    }
}

#[test]
fn test_label_count_comes_from_training_file() {
    let dir = std::env::temp_dir();
    let id = process::id();
    let preds_path = dir.join(format!("macro-at-k-cli-{}-preds.txt", id));
    let train_path = dir.join(format!("macro-at-k-cli-{}-train.txt", id));
    // The highest label in the predictions is 1, but the training data has 4 labels
    std::fs::write(&preds_path, "0:0.9 1:0.2\n1:0.5\n").unwrap();
    std::fs::write(&train_path, "3 2 4\n0 1:1\n3 0:1\n0,2 1:0.5\n").unwrap();

    let args = parse_predict_args(&[
        preds_path.to_str().unwrap(),
        "--method",
        "macro-recall",
        "--k",
        "1",
        "--train_labels",
        train_path.to_str().unwrap(),
    ]);
    let (preds, label_counts) = load_inputs(&args).unwrap();
    assert_eq!(4, preds.cols());
    assert_eq!(Some((vec![2, 0, 1, 1], 3)), label_counts);
    let solution = select(&args, &preds, label_counts.as_ref()).unwrap();
    assert!(solution.assignment.is_complete());

    let args = parse_predict_args(&[preds_path.to_str().unwrap(), "--method", "macro-recall"]);
    assert!(matches!(load_inputs(&args), Err(Error::InvalidHyperParam(_))));
}
