//! Benchmarks for parsing, routing and chain augmentation.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use rolechain::chain::{DelegationChain, FnTransform, TransformOutput};
use rolechain::core::StageResponse;
use rolechain::parsing::{expected_keys, StructuredResponseParser};
use rolechain::pipeline::PipelineBuilder;
use rolechain::stages::{SharedStage, Stage};
use rolechain::testing::FixedStage;

const FENCED: &str = "```json\n{\n  \"summary\": \"Customer wants a refund\",\n  \"priority\": \"high\",\n  \"tags\": [\"billing\", \"refund\"]\n}\n```";

fn parse_benchmark(c: &mut Criterion) {
    let parser = StructuredResponseParser::default();
    let keys = expected_keys(["summary", "priority"]);

    c.bench_function("parse_fenced_object", |b| {
        b.iter(|| parser.parse(black_box(FENCED), Some(&keys)))
    });
    c.bench_function("parse_malformed", |b| {
        b.iter(|| parser.parse(black_box("I think the answer is yes."), None))
    });
}

fn routing_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime builds");

    let mut builder = PipelineBuilder::new("bench");
    for i in 0..15 {
        builder = builder.stage(Arc::new(
            FixedStage::new(format!("reject-{i}"), StageResponse::text("no")).rejecting(),
        ));
    }
    let pipeline = builder
        .stage(Arc::new(FixedStage::new("last", StageResponse::text("yes"))))
        .build()
        .expect("pipeline builds");

    c.bench_function("route_sixteen_stages", |b| {
        b.iter(|| runtime.block_on(pipeline.run(black_box("where is my parcel?"))))
    });
}

fn chain_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime builds");

    let base: SharedStage = Arc::new(FixedStage::new("base", StageResponse::text("5 days.")));
    let mut chain = DelegationChain::new("layered", base);
    for i in 0..8 {
        let key = format!("note_{i}");
        chain = chain.then(FnTransform::new(key.clone(), move |_: &str, _: &StageResponse| {
            Ok(TransformOutput::annotate(key.clone(), serde_json::json!(i)))
        }));
    }

    c.bench_function("chain_eight_annotations", |b| {
        b.iter(|| runtime.block_on(chain.process(black_box("q"))))
    });
}

criterion_group!(benches, parse_benchmark, routing_benchmark, chain_benchmark);
criterion_main!(benches);
