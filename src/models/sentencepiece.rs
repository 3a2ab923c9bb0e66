// SentencePiece model files (`source.spm`, `target.spm`) are protobuf
// `ModelProto` messages. Only the piece table is read here; trainer and
// normalizer settings are skipped by the decoder as unknown fields.
//
// Marian checkpoints number their tokens through a joint `vocab.json`, not
// through the SentencePiece piece order, so the tokenizer built below uses
// the `vocab.json` ids and borrows each piece's score from the `.spm` table.

use anyhow::{Context, Result};
use prost::Message;
use std::collections::HashMap;
use std::path::Path;
use tokenizers::models::unigram::Unigram;
use tokenizers::normalizers::{NFKC, Nmt, Sequence};
use tokenizers::pre_tokenizers::metaspace::{Metaspace, PrependScheme};
use tokenizers::{AddedToken, Tokenizer};

pub const EOS_TOKEN: &str = "</s>";
pub const UNK_TOKEN: &str = "<unk>";
pub const PAD_TOKEN: &str = "<pad>";

const WORD_BOUNDARY: char = '▁';

// Pieces that only the other language's model knows about.
const MISSING_PIECE_PENALTY: f64 = 10.0;

#[derive(Clone, PartialEq, Message)]
pub struct ModelProto {
    #[prost(message, repeated, tag = "1")]
    pub pieces: Vec<SentencePiece>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SentencePiece {
    #[prost(string, optional, tag = "1")]
    pub piece: Option<String>,
    #[prost(float, optional, tag = "2")]
    pub score: Option<f32>,
    #[prost(int32, optional, tag = "3")]
    pub kind: Option<i32>,
}

/// Piece → log-probability score from the bytes of a `.spm` file.
pub fn piece_scores(bytes: &[u8]) -> Result<HashMap<String, f32>> {
    let model = ModelProto::decode(bytes).context("Invalid SentencePiece model")?;
    if model.pieces.is_empty() {
        anyhow::bail!("SentencePiece model has no pieces");
    }
    Ok(model
        .pieces
        .into_iter()
        .filter_map(|p| Some((p.piece?, p.score.unwrap_or(0.0))))
        .collect())
}

pub fn read_piece_scores(path: &Path) -> Result<HashMap<String, f32>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    piece_scores(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn read_vocab(path: &Path) -> Result<HashMap<String, u32>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Unigram tokenizer emitting Marian vocabulary ids.
///
/// Every `vocab.json` entry becomes a piece at its own id. Entries the
/// SentencePiece model does not know get a score below every real piece, so
/// they are only picked when nothing else covers the text. `</s>`, `<unk>`
/// and `<pad>` are registered as special tokens and dropped by
/// `decode(ids, true)`.
pub fn marian_tokenizer(scores: &HashMap<String, f32>, vocab: &HashMap<String, u32>) -> Result<Tokenizer> {
    let size = vocab
        .values()
        .max()
        .map(|id| *id as usize + 1)
        .ok_or_else(|| anyhow::anyhow!("Marian vocabulary is empty"))?;
    let unk_id = vocab
        .get(UNK_TOKEN)
        .map(|id| *id as usize)
        .ok_or_else(|| anyhow::anyhow!("Marian vocabulary has no {} token", UNK_TOKEN))?;

    let floor = scores.values().copied().fold(0.0f32, f32::min) as f64 - MISSING_PIECE_PENALTY;
    let mut pieces: Vec<(String, f64)> = (0..size).map(|id| (format!("<unused_{id}>"), floor)).collect();
    for (piece, id) in vocab {
        let score = scores.get(piece).map(|s| *s as f64).unwrap_or(floor);
        pieces[*id as usize] = (piece.clone(), score);
    }

    let model = Unigram::from(pieces, Some(unk_id), false)
        .map_err(|e| anyhow::anyhow!("Failed to build unigram model: {}", e))?;

    let mut tokenizer = Tokenizer::new(model);
    tokenizer
        .with_normalizer(Some(Sequence::new(vec![Nmt.into(), NFKC.into()])))
        .with_pre_tokenizer(Some(Metaspace::new(WORD_BOUNDARY, PrependScheme::Always, true)))
        .with_decoder(Some(Metaspace::new(WORD_BOUNDARY, PrependScheme::Always, true)));

    let specials: Vec<AddedToken> = [EOS_TOKEN, UNK_TOKEN, PAD_TOKEN]
        .into_iter()
        .filter(|token| vocab.contains_key(*token))
        .map(|token| AddedToken::from(token, true))
        .collect();
    tokenizer.add_special_tokens(&specials);

    Ok(tokenizer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn piece(text: &str, score: f32, kind: i32) -> SentencePiece {
        SentencePiece {
            piece: Some(text.to_string()),
            score: Some(score),
            kind: Some(kind),
        }
    }

    fn spm_bytes() -> Vec<u8> {
        let mut pieces = vec![
            piece("<unk>", 0.0, 2),
            piece("<s>", 0.0, 3),
            piece("</s>", 0.0, 3),
            piece("▁Hello", -1.0, 1),
            piece("▁world", -1.5, 1),
            piece("▁", -2.0, 1),
        ];
        pieces.extend("Helowrd".chars().map(|c| piece(&c.to_string(), -5.0, 1)));
        ModelProto { pieces }.encode_to_vec()
    }

    fn vocab() -> HashMap<String, u32> {
        let mut vocab: HashMap<String, u32> = [("</s>", 0), ("<unk>", 1), ("▁Hello", 2), ("▁world", 3), ("▁", 4)]
            .into_iter()
            .map(|(p, id)| (p.to_string(), id))
            .collect();
        for (offset, c) in "Helowrd".chars().enumerate() {
            vocab.insert(c.to_string(), 5 + offset as u32);
        }
        // only known to the other side's model
        vocab.insert("▁Γεια".to_string(), 12);
        vocab.insert("<pad>".to_string(), 13);
        vocab
    }

    #[test]
    fn test_piece_scores_read_from_model_proto() {
        let scores = piece_scores(&spm_bytes()).unwrap();
        assert_eq!(scores.len(), 13);
        assert_eq!(scores["▁Hello"], -1.0);
        assert_eq!(scores["</s>"], 0.0);
    }

    #[test]
    fn test_empty_model_is_rejected() {
        assert!(piece_scores(&[]).is_err());
    }

    #[test]
    fn test_encoding_uses_vocab_json_ids() {
        let scores = piece_scores(&spm_bytes()).unwrap();
        let tokenizer = marian_tokenizer(&scores, &vocab()).unwrap();

        let encoding = tokenizer.encode("Hello world", true).unwrap();
        assert_eq!(encoding.get_ids(), &[2, 3]);

        // falls back to characters for unseen words
        let encoding = tokenizer.encode("red", true).unwrap();
        assert_eq!(encoding.get_ids(), &[4, 10, 6, 11]);
    }

    #[test]
    fn test_decoding_drops_special_tokens() {
        let scores = piece_scores(&spm_bytes()).unwrap();
        let tokenizer = marian_tokenizer(&scores, &vocab()).unwrap();

        let text = tokenizer.decode(&[13, 2, 3, 0], true).unwrap();
        assert_eq!(text, "Hello world");

        let text = tokenizer.decode(&[13, 12, 0], true).unwrap();
        assert_eq!(text, "Γεια");
    }

    #[test]
    fn test_vocab_without_unk_is_rejected() {
        let scores = piece_scores(&spm_bytes()).unwrap();
        let mut vocab = vocab();
        vocab.remove("<unk>");
        assert!(marian_tokenizer(&scores, &vocab).is_err());
    }
}
