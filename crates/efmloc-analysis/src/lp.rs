//! Boolean-linear-programming localization with slack variables, on top of
//! `good_lp`'s pure-Rust backend.

use std::collections::BTreeMap;

use good_lp::{constraint, default_solver, variable, variables, Expression, Solution, SolverModel};

use efmloc_simdata::Link;

use crate::classified::ClassifiedLinkPath;
use crate::errors::AnalysisError;
use crate::localization::{LinkRatings, LinkSet};
use crate::warnings::WarningCounter;

/// For each link a nonnegative unknown, for each path a pair of slack
/// variables; minimize the total slack under the per-path sum constraints.
/// Loss measurements are moved to log-survival space first.
pub(crate) fn lp_with_slack(
    paths: &[ClassifiedLinkPath],
    all_links: &[Link],
    localize_loss: bool,
    loss_rate_th: f64,
    delay_th: f64,
    warn: &WarningCounter,
) -> Result<(LinkSet, LinkRatings), AnalysisError> {
    let mut problem = variables!();

    let mut link_vars: BTreeMap<Link, good_lp::Variable> = BTreeMap::new();
    for &link in all_links {
        // Loss unknowns live in -ln(1 - x) space and are unbounded above; a
        // delay beyond ten seconds is not plausible.
        let var = if localize_loss {
            problem.add(variable().min(0.0))
        } else {
            problem.add(variable().min(0.0).max(10_000.0))
        };
        link_vars.entry(link).or_insert(var);
    }

    let mut slack = Vec::with_capacity(paths.len());
    for _ in paths {
        let positive = problem.add(variable().min(0.0));
        let negative = problem.add(variable().min(0.0));
        slack.push((positive, negative));
    }

    let objective: Expression = slack
        .iter()
        .flat_map(|&(p, n)| [p, n])
        .map(Expression::from)
        .sum();
    let mut model = problem.minimise(objective).using(default_solver);

    for (clp, &(positive, negative)) in paths.iter().zip(&slack) {
        let mut expr = Expression::from(positive) - negative;
        for link in &clp.path.links {
            if let Some(&var) = link_vars.get(link) {
                expr += var;
            }
        }
        let rhs = if localize_loss {
            if clp.measurement < 0.0 {
                return Err(AnalysisError::NegativeLossRate(clp.measurement));
            }
            if clp.measurement >= 1.0 {
                warn.note_dropped_solver_row();
                continue;
            }
            -(1.0 - clp.measurement).ln()
        } else {
            if clp.measurement < 0.0 {
                return Err(AnalysisError::NegativeDelay(clp.measurement));
            }
            clp.measurement
        };
        model = model.with(constraint!(expr == rhs));
    }

    let solution = model
        .solve()
        .map_err(|e| AnalysisError::Solver(e.to_string()))?;

    let mut failed = LinkSet::new();
    let mut ratings = LinkRatings::new();
    for (&link, &var) in &link_vars {
        let value = solution.value(var);
        let rating = if localize_loss {
            1.0 - (-value).exp()
        } else {
            value
        };
        ratings.insert(link, rating);
        let threshold = if localize_loss { loss_rate_th } else { delay_th };
        if rating >= threshold {
            failed.insert(link);
        }
    }
    Ok((failed, ratings))
}
