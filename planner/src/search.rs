use log::{debug, info, warn};
use ordered_float::OrderedFloat;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{domain::DomainModel, pddl::solution_cost, runner::SolverRunner, SolverError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
    /// One run with a time budget.
    Timed { seconds: u64 },
    /// Repeated fastest-plan runs keeping the cheapest.
    Sampling { tries: u32 },
}

impl SearchMode {
    pub fn new(search_seconds: u64, num_tries: u32) -> Self {
        if search_seconds == 0 {
            SearchMode::Sampling { tries: num_tries }
        } else {
            SearchMode::Timed {
                seconds: search_seconds,
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SearchProgress {
    pub iteration: u32,
    pub tries: u32,
    pub best_cost: Option<f64>,
}

/// Solves `problem`, returning the raw plan text or `None` when no plan
/// was found within budget. In timed mode the run is never interrupted;
/// `cancel` only stops sampling.
pub async fn search(
    runner: &SolverRunner,
    model: DomainModel,
    problem: &str,
    mode: SearchMode,
    cancel: Option<&CancellationToken>,
    progress: Option<&watch::Sender<SearchProgress>>,
) -> Result<Option<String>, SolverError> {
    match mode {
        SearchMode::Timed { seconds } => {
            let job = runner.prepare(model, problem, seconds).await?;
            match job.run(None).await {
                Ok(text) => Ok(Some(text)),
                Err(SolverError::Timeout { budget }) => {
                    info!("no plan within {} s", budget);
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        }
        SearchMode::Sampling { tries } => {
            let mut best: Option<(OrderedFloat<f64>, String)> = None;
            for iteration in 1..=tries {
                if cancel.map_or(false, |c| c.is_cancelled()) {
                    info!("sampling cancelled after {} of {} tries", iteration - 1, tries);
                    break;
                }

                let job = runner.prepare(model, problem, 0).await?;
                let text = match job.run(cancel).await {
                    Ok(text) => text,
                    Err(SolverError::Cancelled) => break,
                    Err(e @ SolverError::Launch { .. }) | Err(e @ SolverError::NoCommand) => return Err(e),
                    Err(e) => {
                        warn!("sample {} discarded: {}", iteration, e);
                        continue;
                    }
                };
                let Some(cost) = solution_cost(&text) else {
                    warn!("sample {} discarded: no cost in solver output", iteration);
                    continue;
                };

                debug!("sample {} cost {:.2}", iteration, cost);
                if best.as_ref().map_or(true, |(c, _)| OrderedFloat(cost) < *c) {
                    best = Some((OrderedFloat(cost), text));
                }
                if let Some(progress) = progress {
                    progress.send_replace(SearchProgress {
                        iteration,
                        tries,
                        best_cost: best.as_ref().map(|(c, _)| c.0),
                    });
                }
            }
            Ok(best.map(|(_, text)| text))
        }
    }
}
