use poet_verifier::*;
use poet_verifier::testing::Chain;
use criterion::Criterion;

pub fn blocks(crit: &mut Criterion) {
    let mut chain = Chain::new();
    chain.extend(2 * chain.timer.certificate_sample_length);
    let verifier = chain.verifier(Policy::Strict);
    let block = chain.candidate();
    crit.bench_function("verify block", |b| b.iter(|| {
        assert!(verifier.verify(&block));
    }));
}

pub fn certificates(crit: &mut Criterion) {
    let mut chain = Chain::new();
    chain.extend(2 * chain.timer.certificate_sample_length);
    let enclave = chain.enclave();
    let block = chain.candidate();
    crit.bench_function("certificate history", |b| b.iter(|| {
        let _ = certificate::build_certificate_list(
            &block.header,
            chain.cache.as_ref(),
            enclave.as_ref(),
            chain.timer.certificate_sample_length
        );
    }));
    crit.bench_function("local mean", |b| b.iter(|| {
        let _ = chain.timer.compute_local_mean(chain.history());
    }));
}
