//! Многопоточный скоринг на постоянном пуле рабочих потоков.
//!
//! Пул создаётся в `allocate` и живёт до `deallocate`. Задачи уходят в
//! общую очередь (mpsc), рабочие забирают их по одной; результаты
//! возвращаются по отдельному каналу вместе с номером куска и
//! собираются в исходном порядке.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use acoustic::{ScoreProvider, SenoneId};
use asr_core::{AsrError, AsrResult, FeatureFrame, ScorerConfig};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::AcousticScorer;

type Job = Box<dyn FnOnce() + Send + 'static>;

// ---------------------------------------------------------------------------
// Пул потоков
// ---------------------------------------------------------------------------

struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn new(size: usize) -> AsrResult<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver: Arc<Mutex<Receiver<Job>>> = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("scorer-{i}"))
                .spawn(move || {
                    loop {
                        let job = receiver.lock().recv();
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    }
                })?;
            workers.push(handle);
        }
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    fn execute(&self, job: Job) -> AsrResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| AsrError::Scoring("пул потоков остановлен".to_string()))?;
        sender
            .send(job)
            .map_err(|_| AsrError::Scoring("рабочие потоки завершились".to_string()))
    }

    fn size(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Закрытие канала завершает циклы рабочих.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("scorer").to_string();
            if worker.join().is_err() {
                warn!("Поток {name} завершился паникой");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Скорер
// ---------------------------------------------------------------------------

/// Режет сеноны кадра на куски и оценивает их в пуле потоков.
///
/// Размер куска — `max(ceil(total / threads), min_scoreables_per_thread)`;
/// если весь кадр помещается в один кусок, скоринг идёт в вызывающем
/// потоке.
pub struct ThreadedAcousticScorer<P> {
    provider: Arc<P>,
    num_threads: usize,
    min_scoreables_per_thread: usize,
    pool: Option<WorkerPool>,
}

impl<P: ScoreProvider + 'static> ThreadedAcousticScorer<P> {
    /// Скорер с параметрами пула из конфигурации.
    pub fn new(provider: Arc<P>, config: &ScorerConfig) -> AsrResult<Self> {
        config.validate()?;
        Ok(Self {
            provider,
            num_threads: config.effective_threads(),
            min_scoreables_per_thread: config.min_scoreables_per_thread,
            pool: None,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Размер куска для `total` сенонов.
    pub fn job_size(&self, total: usize) -> usize {
        total
            .div_ceil(self.num_threads.max(1))
            .max(self.min_scoreables_per_thread)
    }

    fn score_inline(&self, senones: &[SenoneId], features: &[f32]) -> AsrResult<Vec<f32>> {
        senones
            .iter()
            .map(|&s| self.provider.senone_score(s, features))
            .collect()
    }
}

impl<P: ScoreProvider + 'static> AcousticScorer for ThreadedAcousticScorer<P> {
    fn name(&self) -> &str {
        "threaded"
    }

    fn allocate(&mut self) -> AsrResult<()> {
        if self.pool.is_none() && self.num_threads > 1 {
            let pool = WorkerPool::new(self.num_threads)?;
            info!("Пул скоринга: {} потоков", pool.size());
            self.pool = Some(pool);
        }
        Ok(())
    }

    fn deallocate(&mut self) {
        if self.pool.take().is_some() {
            debug!("Пул скоринга остановлен");
        }
    }

    fn score_senones(&mut self, senones: &[SenoneId], frame: &FeatureFrame) -> AsrResult<Vec<f32>> {
        let total = senones.len();
        let job_size = self.job_size(total);
        let Some(pool) = self.pool.as_ref().filter(|_| job_size < total) else {
            return self.score_inline(senones, &frame.values);
        };

        let features: Arc<[f32]> = Arc::from(frame.values.as_slice());
        let (reply_tx, reply_rx) = mpsc::channel::<(usize, AsrResult<Vec<f32>>)>();
        let mut chunks = 0;
        for (index, chunk) in senones.chunks(job_size).enumerate() {
            let chunk = chunk.to_vec();
            let provider = Arc::clone(&self.provider);
            let features = Arc::clone(&features);
            let reply = reply_tx.clone();
            pool.execute(Box::new(move || {
                let scores = chunk
                    .iter()
                    .map(|&s| provider.senone_score(s, &features))
                    .collect();
                // Получатель мог уйти после ошибки в другом куске.
                let _ = reply.send((index, scores));
            }))?;
            chunks += 1;
        }
        drop(reply_tx);

        let mut parts: Vec<Option<Vec<f32>>> = vec![None; chunks];
        for _ in 0..chunks {
            let (index, scores) = reply_rx
                .recv()
                .map_err(|_| AsrError::Scoring("рабочий поток не вернул результат".to_string()))?;
            parts[index] = Some(scores?);
        }
        let mut scores = Vec::with_capacity(total);
        for part in parts.into_iter().flatten() {
            scores.extend(part);
        }
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acoustic::PrecomputedScores;

    fn scorer(threads: usize, min_per_thread: usize, senones: usize) -> ThreadedAcousticScorer<PrecomputedScores> {
        let config = ScorerConfig {
            num_threads: threads,
            cpu_relative: false,
            min_scoreables_per_thread: min_per_thread,
            ..ScorerConfig::default()
        };
        ThreadedAcousticScorer::new(Arc::new(PrecomputedScores::new(senones)), &config).unwrap()
    }

    fn frame(n: usize) -> FeatureFrame {
        FeatureFrame::new(0, (0..n).map(|i| -(i as f32)).collect())
    }

    #[test]
    fn test_job_size() {
        let s = scorer(3, 2, 10);
        assert_eq!(s.job_size(10), 4);
        assert_eq!(s.job_size(3), 2);
        let s = scorer(4, 10, 10);
        assert_eq!(s.job_size(12), 10);
    }

    #[test]
    fn test_chunks_reassembled_in_order() {
        let mut s = scorer(3, 2, 20);
        s.allocate().unwrap();
        let senones: Vec<SenoneId> = (0..20u32).rev().map(SenoneId).collect();
        let scores = s.score_senones(&senones, &frame(20)).unwrap();
        let expected: Vec<f32> = senones.iter().map(|s| -(s.0 as f32)).collect();
        assert_eq!(scores, expected);

        // Несколько кадров на одном пуле.
        let scores = s.score_senones(&senones[..7], &frame(20)).unwrap();
        assert_eq!(scores, expected[..7]);
        s.deallocate();
    }

    #[test]
    fn test_small_frame_scored_inline_without_pool() {
        let mut s = scorer(4, 10, 5);
        let senones = [SenoneId(4), SenoneId(1)];
        assert_eq!(s.score_senones(&senones, &frame(5)).unwrap(), vec![-4.0, -1.0]);
    }

    #[test]
    fn test_worker_error_propagates() {
        let mut s = scorer(2, 1, 4);
        s.allocate().unwrap();
        let senones = [SenoneId(0), SenoneId(1), SenoneId(2), SenoneId(9)];
        assert!(s.score_senones(&senones, &frame(4)).is_err());
    }
}
