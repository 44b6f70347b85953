use anyhow::{Result, anyhow, bail};
use candle_core::{Device, Tensor};
use tokenizers::{EncodeInput, Tokenizer};

/// XLM-RoBERTa pad token id.
pub const PAD_ID: u32 = 1;

/// Encode a single text or a (query, passage) pair into fixed-length
/// `[1, max_len]` id and mask tensors, truncating the tail and padding.
pub fn tokenize_on_device<'s, E>(tokenizer: &Tokenizer, input: E, max_len: usize, device: &Device) -> Result<(Tensor, Tensor)>
where
    E: Into<EncodeInput<'s>>,
{
    let enc = tokenizer.encode(input, true).map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    let mut ids = enc.get_ids().to_vec();
    let mut mask = enc.get_attention_mask().to_vec();
    if ids.len() > max_len { ids.truncate(max_len); mask.truncate(max_len); }
    if ids.len() < max_len { let pad = max_len - ids.len(); ids.extend(std::iter::repeat(PAD_ID).take(pad)); mask.extend(std::iter::repeat(0).take(pad)); }
    let input_ids = Tensor::from_iter(ids, device)?.reshape((1, max_len))?;
    let attention_mask = Tensor::from_iter(mask, device)?.reshape((1, max_len))?;
    Ok((input_ids, attention_mask))
}

/// Row-major ids and mask of a padded batch, plus its sequence length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddedBatch {
    pub ids: Vec<u32>,
    pub mask: Vec<u32>,
    pub seq_len: usize,
}

/// Truncate every sequence to `max_len`, then pad all of them to the longest
/// one left. Short batches stay short instead of paying for `max_len`.
pub fn pad_batch(encoded: Vec<(Vec<u32>, Vec<u32>)>, max_len: usize) -> Result<PaddedBatch> {
    if encoded.is_empty() { bail!("cannot pad an empty batch"); }
    let seq_len = encoded.iter().map(|(ids, _)| ids.len().min(max_len)).max().unwrap_or(0).max(1);
    let mut ids = Vec::with_capacity(encoded.len() * seq_len);
    let mut mask = Vec::with_capacity(encoded.len() * seq_len);
    for (mut row_ids, mut row_mask) in encoded {
        if row_ids.len() != row_mask.len() { bail!("ids and mask lengths differ ({} vs {})", row_ids.len(), row_mask.len()); }
        row_ids.truncate(seq_len);
        row_mask.truncate(seq_len);
        let pad = seq_len - row_ids.len();
        ids.extend(row_ids.into_iter().chain(std::iter::repeat(PAD_ID).take(pad)));
        mask.extend(row_mask.into_iter().chain(std::iter::repeat(0).take(pad)));
    }
    Ok(PaddedBatch { ids, mask, seq_len })
}

/// Encode a batch of texts or pairs into `[B, T]` id and mask tensors, where
/// `T` is the longest encoding in the batch capped at `max_len`.
pub fn tokenize_batch_on_device<'s, E>(tokenizer: &Tokenizer, inputs: Vec<E>, max_len: usize, device: &Device) -> Result<(Tensor, Tensor)>
where
    E: Into<EncodeInput<'s>>,
{
    let rows = inputs.len();
    let encoded = inputs
        .into_iter()
        .map(|input| {
            let enc = tokenizer.encode(input, true).map_err(|e| anyhow!("Tokenization failed: {}", e))?;
            Ok((enc.get_ids().to_vec(), enc.get_attention_mask().to_vec()))
        })
        .collect::<Result<Vec<_>>>()?;
    let batch = pad_batch(encoded, max_len)?;
    let input_ids = Tensor::from_iter(batch.ids, device)?.reshape((rows, batch.seq_len))?;
    let attention_mask = Tensor::from_iter(batch.mask, device)?.reshape((rows, batch.seq_len))?;
    Ok((input_ids, attention_mask))
}
