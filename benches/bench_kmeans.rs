use criterion::{criterion_group, criterion_main, Criterion};
use kmeans_bridge::{
    generate_points, Bridge, DataMarshaller, EngineModule, InitStrategy, KMeansConfig,
    NumericWidth,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn bench_kmeans(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let points = generate_points(20_000, 8, &mut rng);

    for width in [NumericWidth::F64, NumericWidth::F32] {
        let config = KMeansConfig::new(8, 100, 1e-6)
            .with_init(InitStrategy::KMeansPlusPlus)
            .with_precision(width);
        let mut module = EngineModule::load(&config).expect("engine loads");

        c.bench_function(&format!("kmeans_pipeline_20k_8d_{width}"), |b| {
            b.iter(|| {
                let buffer = DataMarshaller::flatten(&points, width).expect("flatten");
                let mut bridge = Bridge::new(&mut module, width, 8);
                let address = bridge.copy_in(&buffer).expect("copy in");
                let outcome = bridge.invoke(address, buffer.len()).expect("predict");
                bridge.read_result(&outcome)
            });
        });
    }
}

criterion_group!(benches, bench_kmeans);
criterion_main!(benches);
