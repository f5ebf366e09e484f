//! Benchmarks for the wrap + assemble hot path
//!
//! - Role authorization and sign-envelope encoding
//! - v0 compilation, signing and size check, with and without lookup tables

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount, hash::Hash, pubkey::Pubkey,
    signature::Keypair, signer::Signer,
};

use delegated_swap::authority::{
    Permission, PermissionOracle, Role, RoleOracle, WalletState, WrapOptions,
    DEFAULT_WALLET_PROGRAM_ID,
};
use delegated_swap::canonical::{AccountRef, CanonicalInstruction};
use delegated_swap::tx_builder::{assemble_with_tables, BlockhashContext, ComputeBudget};

fn route_instructions(n: usize, user: Pubkey) -> Vec<CanonicalInstruction> {
    (0..n)
        .map(|i| {
            CanonicalInstruction::new(
                Pubkey::new_unique(),
                vec![
                    AccountRef::writable(user),
                    AccountRef::writable(Pubkey::new_unique()),
                    AccountRef::readonly(Pubkey::new_unique()),
                ],
                vec![i as u8; 16],
            )
        })
        .collect()
}

fn bench_wrap(c: &mut Criterion) {
    let root = Keypair::new();
    let wallet = WalletState {
        address: Pubkey::new_unique(),
        program_id: DEFAULT_WALLET_PROGRAM_ID,
        roles: vec![Role { id: 0, signer: root.pubkey(), permissions: vec![Permission::All] }],
    };
    let oracle = RoleOracle::new(DEFAULT_WALLET_PROGRAM_ID);
    let opts = WrapOptions::new(root.pubkey()).with_payer(root.pubkey());

    let mut group = c.benchmark_group("wrap");
    for n in [1usize, 3, 6] {
        let ixs = route_instructions(n, wallet.spend_wallet());
        group.bench_with_input(BenchmarkId::from_parameter(n), &ixs, |b, ixs| {
            b.iter(|| oracle.authorize(black_box(&wallet), 0, black_box(ixs), &opts).unwrap())
        });
    }
    group.finish();
}

fn bench_assemble(c: &mut Criterion) {
    let payer = Keypair::new();
    let blockhash = BlockhashContext::new(Hash::new_unique(), 1_000);
    let budget = ComputeBudget::default();
    let ixs = route_instructions(4, Pubkey::new_unique());
    let table = AddressLookupTableAccount {
        key: Pubkey::new_unique(),
        addresses: ixs.iter().flat_map(|ix| ix.accounts().iter().map(|a| a.address)).collect(),
    };

    c.bench_function("assemble_no_tables", |b| {
        b.iter(|| {
            assemble_with_tables(&payer, black_box(&ixs), Vec::new(), Some(200_000), &blockhash, &budget)
                .unwrap()
        })
    });

    c.bench_function("assemble_with_table", |b| {
        b.iter(|| {
            assemble_with_tables(
                &payer,
                black_box(&ixs),
                vec![table.clone()],
                Some(200_000),
                &blockhash,
                &budget,
            )
            .unwrap()
        })
    });
}

criterion_group!(benches, bench_wrap, bench_assemble);
criterion_main!(benches);
