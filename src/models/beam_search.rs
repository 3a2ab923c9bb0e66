// Beam search over an arbitrary scoring step.
//
// `step` receives the live hypotheses (all the same length) and returns one
// row of log-probabilities over the vocabulary per hypothesis. Finished
// hypotheses are ranked by their summed log-probability divided by
// `generated_len ^ length_penalty`.

use anyhow::Result;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub struct BeamSettings {
    pub num_beams: usize,
    /// Longest hypothesis, start token included.
    pub max_positions: usize,
    pub start_token: u32,
    pub eos_tokens: Vec<u32>,
    /// Never proposed as a continuation.
    pub banned_token: u32,
    pub length_penalty: f64,
}

#[derive(Debug, Clone)]
struct Hypothesis {
    tokens: Vec<u32>,
    log_prob: f32,
}

impl Hypothesis {
    fn normalized_score(&self, length_penalty: f64) -> f64 {
        let generated = self.tokens.len().saturating_sub(1).max(1) as f64;
        self.log_prob as f64 / generated.powf(length_penalty)
    }
}

fn by_score_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Indices of the `k` best entries of `row`, skipping `banned`.
fn top_candidates(row: &[f32], k: usize, banned: u32) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..row.len()).filter(|&i| i as u32 != banned).collect();
    if k < idx.len() {
        idx.select_nth_unstable_by(k - 1, |&a, &b| by_score_desc(row[a] as f64, row[b] as f64));
        idx.truncate(k);
    }
    idx
}

/// Returns the best hypothesis, start token first and EOS (if reached) last.
pub fn beam_search<F>(settings: &BeamSettings, mut step: F) -> Result<Vec<u32>>
where
    F: FnMut(&[Vec<u32>]) -> Result<Vec<Vec<f32>>>,
{
    let num_beams = settings.num_beams.max(1);
    let penalty = settings.length_penalty;

    let mut live = vec![Hypothesis {
        tokens: vec![settings.start_token],
        log_prob: 0.0,
    }];
    let mut finished: Vec<Hypothesis> = Vec::new();

    while live[0].tokens.len() < settings.max_positions {
        let prefixes: Vec<Vec<u32>> = live.iter().map(|h| h.tokens.clone()).collect();
        let log_probs = step(&prefixes)?;
        if log_probs.len() != live.len() {
            anyhow::bail!(
                "Scoring step returned {} rows for {} hypotheses",
                log_probs.len(),
                live.len()
            );
        }

        let mut candidates: Vec<(f32, usize, u32)> = Vec::new();
        for (beam, row) in log_probs.iter().enumerate() {
            for index in top_candidates(row, 2 * num_beams, settings.banned_token) {
                candidates.push((live[beam].log_prob + row[index], beam, index as u32));
            }
        }
        candidates.sort_by(|a, b| by_score_desc(a.0 as f64, b.0 as f64));

        let mut next = Vec::with_capacity(num_beams);
        for (rank, (log_prob, beam, token)) in candidates.into_iter().enumerate() {
            let mut tokens = live[beam].tokens.clone();
            tokens.push(token);
            let hypothesis = Hypothesis { tokens, log_prob };

            if settings.eos_tokens.contains(&token) {
                // An EOS outside the top `num_beams` is not a contender.
                if rank < num_beams {
                    finished.push(hypothesis);
                }
            } else {
                next.push(hypothesis);
            }
            if next.len() == num_beams {
                break;
            }
        }

        finished.sort_by(|a, b| by_score_desc(a.normalized_score(penalty), b.normalized_score(penalty)));
        finished.truncate(num_beams);

        if next.is_empty() {
            live.clear();
            break;
        }
        live = next;

        if finished.len() == num_beams {
            let worst_finished = finished[num_beams - 1].normalized_score(penalty);
            let best_live = live[0].normalized_score(penalty);
            if worst_finished >= best_live {
                tracing::trace!("Beam search converged at {} positions", live[0].tokens.len());
                live.clear();
                break;
            }
        }
    }

    // Hypotheses cut off by the length cap still compete.
    finished.extend(live);
    finished
        .into_iter()
        .max_by(|a, b| {
            a.normalized_score(penalty)
                .partial_cmp(&b.normalized_score(penalty))
                .unwrap_or(Ordering::Equal)
        })
        .map(|h| h.tokens)
        .ok_or_else(|| anyhow::anyhow!("Beam search produced no hypothesis"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EOS: u32 = 0;
    const A: u32 = 1;
    const B: u32 = 2;
    const PAD: u32 = 3;
    const START: u32 = PAD;

    fn settings(num_beams: usize, max_positions: usize) -> BeamSettings {
        BeamSettings {
            num_beams,
            max_positions,
            start_token: START,
            eos_tokens: vec![EOS],
            banned_token: PAD,
            length_penalty: 1.0,
        }
    }

    fn log_rows(prefixes: &[Vec<u32>], table: impl Fn(&[u32]) -> [f32; 4]) -> Result<Vec<Vec<f32>>> {
        Ok(prefixes
            .iter()
            .map(|prefix| table(prefix).iter().map(|p| p.ln()).collect())
            .collect())
    }

    // Greedy takes A first, but the best complete sentence starts with B.
    fn garden_path(prefix: &[u32]) -> [f32; 4] {
        match prefix {
            [START] => [0.01, 0.55, 0.40, 0.04],
            [START, A] => [0.30, 0.35, 0.35, 0.0],
            [START, B] => [0.90, 0.05, 0.05, 0.0],
            _ => [0.98, 0.01, 0.01, 0.0],
        }
    }

    #[test]
    fn test_beam_search_finds_better_sentence_than_greedy() {
        let best = beam_search(&settings(2, 10), |p| log_rows(p, garden_path)).unwrap();
        assert_eq!(best, vec![START, B, EOS]);
    }

    #[test]
    fn test_single_beam_follows_greedy_path() {
        let best = beam_search(&settings(1, 10), |p| log_rows(p, garden_path)).unwrap();
        assert_eq!(best[1], A);
        assert_eq!(best.last(), Some(&EOS));
    }

    #[test]
    fn test_length_cap_counts_start_token() {
        let mut calls = 0;
        let best = beam_search(&settings(3, 6), |p| {
            calls += 1;
            log_rows(p, |_| [0.001, 0.9, 0.099, 0.0])
        })
        .unwrap();

        assert_eq!(best.len(), 6);
        assert!(!best.contains(&EOS));
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_banned_token_is_never_chosen() {
        let best = beam_search(&settings(2, 5), |p| {
            log_rows(p, |prefix| {
                if prefix.len() < 3 {
                    [0.01, 0.01, 0.01, 0.97]
                } else {
                    [0.5, 0.2, 0.1, 0.2]
                }
            })
        })
        .unwrap();

        assert!(!best[1..].contains(&PAD));
        assert_eq!(best.last(), Some(&EOS));
    }

    #[test]
    fn test_live_hypotheses_share_a_length() {
        beam_search(&settings(4, 8), |prefixes| {
            let len = prefixes[0].len();
            assert!(prefixes.iter().all(|p| p.len() == len));
            assert!(prefixes.len() <= 4);
            log_rows(prefixes, |_| [0.1, 0.5, 0.4, 0.0])
        })
        .unwrap();
    }

    #[test]
    fn test_step_row_mismatch_is_an_error() {
        let result = beam_search(&settings(2, 5), |_| Ok(vec![]));
        assert!(result.is_err());
    }
}
