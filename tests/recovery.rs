use approx::assert_relative_eq;
use mnlrs::data::{ChoiceDataset, ChoiceDatasetBuilder, ChoiceRecord};
use mnlrs::likelihood::log_likelihood;
use mnlrs::posterior::{potential_scale_reduction, summarize};
use mnlrs::prior::{ParameterPrior, PriorSpecification};
use mnlrs::sampler::{sample_chains, MetropolisSampler, SamplerOptions};
use mnlrs::simulation::{simulate_seeded, SimulationDesign, STREAMING_ATTRIBUTES};
use mnlrs::{Chain, MleEstimator, MnlError};
use nalgebra::DVector;

fn streaming_data(respondents: usize, seed: u64) -> ChoiceDataset {
    let design = SimulationDesign::streaming_conjoint().with_respondents(respondents);
    let records = simulate_seeded(&design, seed).unwrap();
    ChoiceDatasetBuilder::new(records)
        .attribute_names(STREAMING_ATTRIBUTES)
        .build()
        .unwrap()
}

fn truth() -> DVector<f64> {
    SimulationDesign::streaming_conjoint().part_worths
}

/// 8,000 three-alternative choice sets over four attributes recover the truth within 0.1.
#[test]
fn mle_recovers_simulated_part_worths() {
    let data = streaming_data(800, 2024);
    assert_eq!(data.set_count(), 8_000);

    let result = MleEstimator::default().fit(&data).unwrap();
    let error = (&result.beta - truth()).amax();
    assert!(error < 0.1, "max abs error {error}: {}", result.beta);

    let table = result.table();
    assert_eq!(table[3].name, "price");
    for (row, true_value) in table.iter().zip(truth().iter()) {
        let se = row.std_error.unwrap();
        assert!(se > 0.0 && se < 0.1);
        assert!((row.estimate - true_value).abs() < 4.0 * se);
    }
}

/// 1,000 respondents × 10 tasks of the streaming survey.
///
/// Every coefficient lands within 0.05 and within four standard errors of the
/// truth, and every standard error stays below 0.05.
#[test]
fn streaming_scenario_estimates_are_tight() {
    let data = streaming_data(1_000, 11);
    assert_eq!(data.set_count(), 10_000);
    assert_eq!(data.respondent_count(), 1_000);

    let result = MleEstimator::default().fit(&data).unwrap();
    let se = result.standard_errors.clone().unwrap();
    for k in 0..4 {
        assert!(se[k] < 0.05, "se[{k}] = {}", se[k]);
        assert!(
            (result.beta[k] - truth()[k]).abs() < 4.0 * se[k],
            "beta[{k}] = {} vs {}",
            result.beta[k],
            truth()[k]
        );
    }
    let error = (&result.beta - truth()).amax();
    assert!(error < 0.05, "max abs error {error}: {}", result.beta);
    // Price is identified far more sharply than the dummies.
    assert_relative_eq!(result.beta[3], -0.1, epsilon = 0.01);
    assert!(result.pseudo_r_squared() > 0.05);
}

/// Five times the streaming survey brings every coefficient within 0.05.
#[test]
fn large_streaming_survey_is_within_five_hundredths() {
    let data = streaming_data(5_000, 99);
    let result = MleEstimator::default().fit(&data).unwrap();
    let error = (&result.beta - truth()).amax();
    assert!(error < 0.05, "max abs error {error}: {}", result.beta);
    for interval in result.confidence_intervals.unwrap() {
        assert!(interval.upper - interval.lower < 0.1);
    }
}

#[test]
fn estimation_error_shrinks_with_sample_size() {
    let errors: Vec<f64> = [10, 100, 1_000]
        .iter()
        .map(|&respondents| {
            let data = streaming_data(respondents, 5);
            let result = MleEstimator::default().fit(&data).unwrap();
            (&result.beta - truth()).norm()
        })
        .collect();

    assert!(errors[2] < errors[1], "errors {errors:?}");
    assert!(errors[2] < errors[0], "errors {errors:?}");
    assert!(errors[2] < 0.15, "errors {errors:?}");

    // On a large sample the truth beats nearby parameter values.
    let data = streaming_data(1_000, 6);
    let at_truth = log_likelihood(&truth(), &data);
    for k in 0..4 {
        let mut shifted = truth();
        shifted[k] += if k == 3 { 0.05 } else { 0.3 };
        assert!(log_likelihood(&shifted, &data) < at_truth);
    }
}

#[test]
fn log_likelihood_ignores_alternative_order() {
    let design = SimulationDesign::streaming_conjoint().with_respondents(50);
    let records = simulate_seeded(&design, 8).unwrap();

    let mut permuted: Vec<ChoiceRecord> = Vec::with_capacity(records.len());
    for task in records.chunks(design.alternatives) {
        // Rotate each task so the chosen alternative moves position.
        let mut rotated = task.to_vec();
        rotated.rotate_left(1);
        permuted.extend(rotated);
    }

    let original = ChoiceDataset::build(records).unwrap();
    let shuffled = ChoiceDataset::build(permuted).unwrap();

    for beta in [
        truth(),
        DVector::from_vec(vec![-0.4, 2.0, 0.3, 0.05]),
        DVector::zeros(4),
    ] {
        assert_relative_eq!(
            log_likelihood(&beta, &original),
            log_likelihood(&beta, &shuffled),
            max_relative = 1e-12
        );
    }
}

#[test]
fn posterior_mean_agrees_with_mle() {
    let data = streaming_data(300, 31);
    let mle = MleEstimator::default().fit(&data).unwrap();
    let se = mle.standard_errors.clone().unwrap();

    let prior = PriorSpecification::normal(4, 100.0).unwrap();
    let options = SamplerOptions::from_standard_errors(&se).with_draws(8_000);
    let chain = MetropolisSampler::new(&data, &prior, &options)
        .unwrap()
        .run_seeded(77)
        .unwrap();
    assert_eq!(chain.len(), 8_000);

    let posterior = summarize(&chain, 2_000).unwrap();
    assert!(
        (0.15..=0.5).contains(&posterior.acceptance_rate),
        "acceptance rate {}",
        posterior.acceptance_rate
    );
    for k in 0..4 {
        let gap = (posterior.means[k] - mle.beta[k]).abs();
        assert!(
            gap < 2.0 * posterior.std_devs[k],
            "parameter {k}: posterior mean {} vs mle {}",
            posterior.means[k],
            mle.beta[k]
        );
        assert!(posterior.credible_intervals[k].contains(mle.beta[k]));
    }

    let table = posterior.table(data.attribute_names());
    assert_eq!(table[0].name, "brand_netflix");
}

#[test]
fn hand_tuned_step_sizes_land_in_target_acceptance_band() {
    // 100 respondents × 10 tasks with fixed steps of 0.08 on the dummies and
    // 0.008 on price, started from the origin.
    let data = streaming_data(100, 3);
    let prior = PriorSpecification::normal(4, 5.0)
        .unwrap()
        .with_prior(3, ParameterPrior::normal(1.0))
        .unwrap();
    let options = SamplerOptions::new(DVector::from_vec(vec![0.08, 0.08, 0.08, 0.008]))
        .with_draws(11_000);
    let chain = MetropolisSampler::new(&data, &prior, &options)
        .unwrap()
        .run_seeded(2025)
        .unwrap();
    let rate = chain.acceptance_rate();
    assert!((0.15..=0.5).contains(&rate), "acceptance rate {rate}");

    let posterior = summarize(&chain, 1_000).unwrap();
    assert_eq!(posterior.kept_draws, 10_000);
    assert!(posterior.means[3] < 0.0);
}

#[test]
fn parallel_chains_converge_to_the_same_posterior() {
    let data = streaming_data(100, 12);
    let mle = MleEstimator::default().fit(&data).unwrap();
    let prior = PriorSpecification::normal(4, 100.0).unwrap();
    let options = SamplerOptions::from_standard_errors(mle.standard_errors.as_ref().unwrap())
        .with_draws(4_000)
        .with_initial(mle.beta.clone());

    let chains: Vec<Chain> = sample_chains(&data, &prior, &options, &[1, 2, 3, 4])
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();
    let r_hat = potential_scale_reduction(&chains, 500).unwrap();
    for value in r_hat.iter() {
        assert!(*value < 1.1, "r-hat {r_hat}");
    }
}

#[test]
fn malformed_surveys_are_rejected() {
    let none_chosen = vec![
        ChoiceRecord::new(1, 1, vec![1.0, 0.0, 0.0, 8.0], false),
        ChoiceRecord::new(1, 1, vec![0.0, 1.0, 0.0, 12.0], false),
    ];
    assert!(matches!(
        ChoiceDataset::build(none_chosen),
        Err(MnlError::NoChosenAlternative { .. })
    ));

    let two_chosen = vec![
        ChoiceRecord::new(1, 1, vec![1.0, 0.0, 0.0, 8.0], true),
        ChoiceRecord::new(1, 1, vec![0.0, 1.0, 0.0, 12.0], true),
    ];
    assert!(matches!(
        ChoiceDataset::build(two_chosen),
        Err(MnlError::MultipleChosenAlternatives { .. })
    ));

    let ragged = vec![
        ChoiceRecord::new(1, 1, vec![1.0, 0.0, 0.0, 8.0], true),
        ChoiceRecord::new(1, 1, vec![0.0, 1.0, 0.0, 12.0], false),
        ChoiceRecord::new(1, 2, vec![1.0, 0.0, 8.0], true),
        ChoiceRecord::new(1, 2, vec![0.0, 1.0, 12.0], false),
    ];
    let err = ChoiceDataset::build(ragged).unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn results_render_as_json() {
    let data = streaming_data(50, 4);
    let result = MleEstimator::default().fit(&data).unwrap();
    let json = serde_json::to_value(&result).unwrap();
    assert!(json.get("beta").is_some());
    assert!(json["covariance_error"].is_null());

    let rows = serde_json::to_string(&result.table()).unwrap();
    assert!(rows.contains("brand_prime"));
}
