use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use tsproto_handshake::core::header::{PacketType, S2CHeader};
use tsproto_handshake::crypto::aead::{self, BOOTSTRAP_KEY, BOOTSTRAP_NONCE};
use tsproto_handshake::crypto::keys::{self, Direction};
use tsproto_handshake::crypto::license::License;
use tsproto_handshake::crypto::puzzle::PuzzleChallenge;

#[allow(clippy::unwrap_used)]
fn bench_puzzle(c: &mut Criterion) {
    let mut group = c.benchmark_group("puzzle_verify");
    group.sample_size(20);

    for level in [1_000u32, 10_000, 50_000] {
        let challenge = PuzzleChallenge::generate(level);
        let proof = challenge.solve().unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(level), &proof, |b, proof| {
            b.iter(|| assert!(challenge.verify(proof)))
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_key_schedule(c: &mut Criterion) {
    let license = License::new_default().unwrap();
    let server_ek = license.server_ek().unwrap();
    let client_ek = EdwardsPoint::mul_base(&Scalar::from_bytes_mod_order([7u8; 32]))
        .compress()
        .to_bytes();

    c.bench_function("license_server_ek", |b| {
        b.iter(|| license.server_ek().unwrap())
    });
    c.bench_function("shared_secret", |b| {
        b.iter(|| keys::shared_secret(server_ek.secret(), &client_ek, &[1u8; 10], &[2u8; 54]).unwrap())
    });

    let shared = keys::shared_secret(server_ek.secret(), &client_ek, &[1u8; 10], &[2u8; 54]).unwrap();
    c.bench_function("packet_key", |b| {
        b.iter(|| {
            keys::packet_key(
                PacketType::Command,
                42,
                0,
                Direction::ServerToClient,
                shared.shared_iv(),
            )
        })
    });
}

#[allow(clippy::unwrap_used)]
fn bench_aead(c: &mut Criterion) {
    let mut group = c.benchmark_group("aead_seal_open");
    let header = S2CHeader::encrypted(PacketType::Command, 0);

    for size in [64usize, 512, 1024] {
        let body = vec![0x5A; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("seal_{size}b"), |b| {
            b.iter(|| aead::seal_s2c(&header, &body, &BOOTSTRAP_KEY, &BOOTSTRAP_NONCE).unwrap())
        });

        let sealed = aead::seal_s2c(&header, &body, &BOOTSTRAP_KEY, &BOOTSTRAP_NONCE).unwrap();
        group.bench_function(format!("open_{size}b"), |b| {
            b.iter(|| aead::open_s2c(&sealed, &BOOTSTRAP_KEY, &BOOTSTRAP_NONCE).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_puzzle, bench_key_schedule, bench_aead);
criterion_main!(benches);
