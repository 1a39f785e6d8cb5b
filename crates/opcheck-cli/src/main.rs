//! opcheck: enumerate encodings of the mnemonic list below, exercise each
//! one on the host CPU and record bit-coverage-exhaustive test vectors
//! under the output directory (default `testdata/`).
//!
//! No flags; tuning happens through `OPCHECK_*` environment variables (see
//! [`opcheck_gen::RunConfig::from_env`]) and `RUST_LOG` for verbosity.

use opcheck_gen::{orchestrate, RunConfig};
use opcheck_isa::{DecodeMode, Mnemonic};

/// The mnemonic universe of this binary: general-purpose integer
/// instructions whose operands the sandbox can drive.
const MNEMONICS: &[Mnemonic] = &[
    Mnemonic::Adc,
    Mnemonic::Add,
    Mnemonic::And,
    Mnemonic::Bsf,
    Mnemonic::Bsr,
    Mnemonic::Bswap,
    Mnemonic::Bt,
    Mnemonic::Btc,
    Mnemonic::Btr,
    Mnemonic::Bts,
    Mnemonic::Cmova,
    Mnemonic::Cmovae,
    Mnemonic::Cmovb,
    Mnemonic::Cmovbe,
    Mnemonic::Cmove,
    Mnemonic::Cmovg,
    Mnemonic::Cmovge,
    Mnemonic::Cmovl,
    Mnemonic::Cmovle,
    Mnemonic::Cmovne,
    Mnemonic::Cmovno,
    Mnemonic::Cmovnp,
    Mnemonic::Cmovns,
    Mnemonic::Cmovo,
    Mnemonic::Cmovp,
    Mnemonic::Cmovs,
    Mnemonic::Cmp,
    Mnemonic::Dec,
    Mnemonic::Div,
    Mnemonic::Idiv,
    Mnemonic::Imul,
    Mnemonic::Inc,
    Mnemonic::Lea,
    Mnemonic::Lzcnt,
    Mnemonic::Mov,
    Mnemonic::Movsx,
    Mnemonic::Movzx,
    Mnemonic::Mul,
    Mnemonic::Neg,
    Mnemonic::Not,
    Mnemonic::Or,
    Mnemonic::Popcnt,
    Mnemonic::Rcl,
    Mnemonic::Rcr,
    Mnemonic::Rol,
    Mnemonic::Ror,
    Mnemonic::Sar,
    Mnemonic::Sbb,
    Mnemonic::Seta,
    Mnemonic::Setae,
    Mnemonic::Setb,
    Mnemonic::Setbe,
    Mnemonic::Sete,
    Mnemonic::Setg,
    Mnemonic::Setge,
    Mnemonic::Setl,
    Mnemonic::Setle,
    Mnemonic::Setne,
    Mnemonic::Setno,
    Mnemonic::Setnp,
    Mnemonic::Setns,
    Mnemonic::Seto,
    Mnemonic::Setp,
    Mnemonic::Sets,
    Mnemonic::Shl,
    Mnemonic::Shr,
    Mnemonic::Sub,
    Mnemonic::Test,
    Mnemonic::Tzcnt,
    Mnemonic::Xchg,
    Mnemonic::Xor,
];

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = RunConfig::from_env();
    tracing::info!(
        output_dir = %config.output_dir.display(),
        threads = config.threads,
        "starting vector generation"
    );

    let report = orchestrate::run(&config, DecodeMode::Bits64, MNEMONICS);
    report.print_summary();
    Ok(())
}
