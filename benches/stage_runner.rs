use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use voxrelay::pipeline::context::{ContextChain, keys};
use voxrelay::pipeline::queue::{Message, Queue, StageQueue};
use voxrelay::pipeline::stage::{FnStage, Outputs};
use voxrelay::pipeline::stop::StopFlag;
use voxrelay::pipeline::StageRunner;

const ITEMS: u64 = 2_000;

/// Pushes `ITEMS` inputs through a runner with `workers` workers and drains
/// the ordered output.
fn run_items(workers: usize, work: Duration) -> u64 {
    let input = Arc::new(StageQueue::new());
    let output = Arc::new(StageQueue::new());
    for i in 0..ITEMS {
        input.put(Message::Item(i));
    }
    input.put(Message::Shutdown);

    let stage = FnStage::new("bench", move |i: u64| -> Outputs<'static, u64> {
        if !work.is_zero() {
            thread::sleep(work);
        }
        Box::new(std::iter::once(Ok(i * 2)))
    });
    let runner = StageRunner::new(stage, input, output.clone(), StopFlag::new())
        .expect("setup")
        .with_workers(workers)
        .with_poll_interval(Duration::from_millis(1));
    let handle = thread::spawn(move || runner.run());

    let mut sum = 0;
    while let Message::Item(value) = output.get() {
        sum += value;
    }
    handle.join().expect("runner thread");
    sum
}

fn bench_runner(c: &mut Criterion) {
    let mut group = c.benchmark_group("stage_runner");
    group.sample_size(10);
    for workers in [1, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::new("passthrough", workers), &workers, |b, &w| {
            b.iter(|| black_box(run_items(w, Duration::ZERO)))
        });
        group.bench_with_input(BenchmarkId::new("50us_work", workers), &workers, |b, &w| {
            b.iter(|| black_box(run_items(w, Duration::from_micros(50))))
        });
    }
    group.finish();
}

/// A chain shaped like one synthesized chunk: utterance, transcript,
/// sentence and chunk, with `extra` annotation nodes in between.
fn chunk_chain(extra: usize) -> ContextChain {
    let mut chain = ContextChain::root()
        .add(vec![0i16; 16], Some(keys::RAW_AUDIO))
        .add("what time is it".to_string(), Some(keys::RECOGNIZED_TEXT))
        .add("It is noon.".to_string(), Some(keys::ASSISTANT_SENTENCE));
    for i in 0..extra {
        chain = chain.add(i, Some("annotation"));
    }
    chain.add(vec![0i16; 320], Some(keys::OUTPUT_AUDIO_CHUNK))
}

fn bench_context_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("context_chain");
    for depth in [0, 8, 64] {
        let chain = chunk_chain(depth);
        group.bench_with_input(BenchmarkId::new("phrase_id", depth), &chain, |b, chain| {
            b.iter(|| black_box(chain.index_of(keys::RAW_AUDIO)))
        });
        group.bench_with_input(BenchmarkId::new("get_as_text", depth), &chain, |b, chain| {
            b.iter(|| black_box(chain.get_as::<String>(keys::RECOGNIZED_TEXT).map(String::len)))
        });
    }
    group.bench_function("add", |b| {
        let chain = chunk_chain(0);
        b.iter(|| black_box(chain.add(1u32, Some(keys::LANGUAGE_CODE))))
    });
    group.finish();
}

criterion_group!(benches, bench_runner, bench_context_lookup);
criterion_main!(benches);
