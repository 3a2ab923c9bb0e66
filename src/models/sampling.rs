// Token selection over a single row of logits, done on the CPU copy.

use anyhow::Result;
use rand::Rng;
use rand::distr::{Distribution, weighted::WeightedIndex};

/// Highest-scoring index; the first one wins on ties.
pub fn argmax(logits: &[f32]) -> Option<u32> {
    best_index(logits.iter().copied().enumerate())
}

/// Like [`argmax`] but never returns `banned` (e.g. a pad token).
pub fn argmax_excluding(logits: &[f32], banned: u32) -> Option<u32> {
    best_index(
        logits
            .iter()
            .copied()
            .enumerate()
            .filter(|(index, _)| *index as u32 != banned),
    )
}

fn best_index(scores: impl Iterator<Item = (usize, f32)>) -> Option<u32> {
    scores
        .fold(None, |best: Option<(usize, f32)>, (index, value)| match best {
            Some((_, best_value)) if best_value >= value => best,
            _ => Some((index, value)),
        })
        .map(|(index, _)| index as u32)
}

/// Top-k sampling with temperature. A non-positive temperature counts as 1.0.
pub fn sample_top_k<R: Rng + ?Sized>(logits: &[f32], top_k: usize, temperature: f32, rng: &mut R) -> Result<u32> {
    let vocab_size = logits.len();
    if vocab_size == 0 {
        return Err(anyhow::anyhow!("Empty logits"));
    }

    let temperature = if temperature > 0.0 { temperature } else { 1.0 };
    let scaled: Vec<f32> = logits.iter().map(|v| v / temperature).collect();

    let k = top_k.max(1).min(vocab_size);
    let mut idx: Vec<usize> = (0..vocab_size).collect();
    if k < vocab_size {
        // Keep the k largest in idx[..k], unordered.
        idx.select_nth_unstable_by(k - 1, |&a, &b| {
            scaled[b].partial_cmp(&scaled[a]).unwrap_or(std::cmp::Ordering::Equal)
        });
        idx.truncate(k);
    }

    let max_logit = idx
        .iter()
        .map(|&i| scaled[i])
        .fold(f32::NEG_INFINITY, f32::max);
    let weights: Vec<f32> = idx.iter().map(|&i| (scaled[i] - max_logit).exp()).collect();

    let dist = WeightedIndex::new(&weights)
        .map_err(|e| anyhow::anyhow!("WeightedIndex creation failed: {}", e))?;
    let choice = idx[dist.sample(rng)];
    tracing::trace!("🎲 Top-k sampling: k={}, choice={}", idx.len(), choice);
    Ok(choice as u32)
}
