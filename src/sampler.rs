// file: src/sampler.rs
// description: Greedy, top-k and nucleus sampling over logits, plus log-softmax for beam scoring.
// author: cipher-rc5

use anyhow::Result;

use crate::decoding::GenerationConfig;

pub struct Sampler {
    state: u64,
    do_sample: bool,
    temperature: f32,
    top_p: f32,
    top_k: Option<usize>,
}

impl Sampler {
    pub fn new(seed: u64, cfg: &GenerationConfig) -> Self {
        Self {
            // xorshift has a fixed point at zero
            state: if seed == 0 { 0x1234_5678_9abc_def0 } else { seed },
            do_sample: cfg.do_sample,
            temperature: cfg.temperature,
            top_p: cfg.top_p.unwrap_or(1.0),
            top_k: cfg.top_k,
        }
    }

    pub fn sample(&mut self, logits: &[f32]) -> Result<u32> {
        anyhow::ensure!(!logits.is_empty(), "empty logits");
        if !self.do_sample || self.temperature == 0.0 {
            return Ok(argmax(logits));
        }

        let mut probs: Vec<f32> = logits
            .iter()
            .map(|l| *l / self.temperature.max(1e-6))
            .collect();
        softmax_inplace(&mut probs);

        let mut order: Vec<usize> = (0..probs.len()).collect();
        order.sort_by(|&a, &b| {
            probs[b]
                .partial_cmp(&probs[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if let Some(k) = self.top_k {
            order.truncate(k.max(1));
        }

        let mut kept = Vec::new();
        let mut cum = 0.0;
        for idx in order {
            kept.push(idx);
            cum += probs[idx];
            if cum >= self.top_p {
                break;
            }
        }

        let r = self.next_f32() * cum;
        let mut c = 0.0;
        for &idx in &kept {
            c += probs[idx];
            if r <= c {
                return Ok(idx as u32);
            }
        }
        Ok(kept[kept.len() - 1] as u32)
    }

    fn next_f32(&mut self) -> f32 {
        let s = &mut self.state;
        *s ^= *s << 13;
        *s ^= *s >> 7;
        *s ^= *s << 17;
        ((*s as f64) / (u64::MAX as f64)) as f32
    }
}

pub fn argmax(logits: &[f32]) -> u32 {
    logits
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(idx, _)| idx as u32)
        .unwrap_or(0)
}

pub fn softmax_inplace(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum == 0.0 {
        let uniform = 1.0 / values.len() as f32;
        for v in values.iter_mut() {
            *v = uniform;
        }
    } else {
        for v in values.iter_mut() {
            *v /= sum;
        }
    }
}

pub fn log_softmax_inplace(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let log_sum = values.iter().map(|v| (*v - max).exp()).sum::<f32>().ln() + max;
    for v in values.iter_mut() {
        *v -= log_sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampling(top_p: f32, top_k: Option<usize>) -> GenerationConfig {
        GenerationConfig {
            do_sample: true,
            top_p: Some(top_p),
            top_k,
            ..GenerationConfig::default()
        }
    }

    #[test]
    fn greedy_picks_argmax() {
        let mut s = Sampler::new(7, &GenerationConfig::default());
        assert_eq!(s.sample(&[0.1, 3.0, -2.0, 2.9]).unwrap(), 1);
    }

    #[test]
    fn tiny_top_p_keeps_only_the_best_token() {
        let mut s = Sampler::new(42, &sampling(1e-4, None));
        for _ in 0..32 {
            assert_eq!(s.sample(&[0.0, 1.0, 5.0, 2.0]).unwrap(), 2);
        }
    }

    #[test]
    fn top_k_restricts_support() {
        let mut s = Sampler::new(3, &sampling(1.0, Some(2)));
        for _ in 0..64 {
            let t = s.sample(&[4.0, 4.0, 0.0, 0.0]).unwrap();
            assert!(t < 2, "sampled {t} outside the top-2");
        }
    }

    #[test]
    fn same_seed_same_draws() {
        let logits = [1.0, 1.1, 0.9, 1.05, 0.95];
        let mut a = Sampler::new(99, &sampling(0.95, None));
        let mut b = Sampler::new(99, &sampling(0.95, None));
        let xs: Vec<u32> = (0..16).map(|_| a.sample(&logits).unwrap()).collect();
        let ys: Vec<u32> = (0..16).map(|_| b.sample(&logits).unwrap()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn empty_logits_are_rejected() {
        let mut s = Sampler::new(1, &GenerationConfig::default());
        assert!(s.sample(&[]).is_err());
    }

    #[test]
    fn log_softmax_normalises() {
        let mut v = vec![1.0f32, 2.0, 3.0];
        log_softmax_inplace(&mut v);
        let total: f32 = v.iter().map(|x| x.exp()).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(v.iter().all(|x| *x <= 0.0));
    }
}
