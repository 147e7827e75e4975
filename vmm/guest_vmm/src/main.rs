// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Loads a guest kernel and boot sector into a new guest and starts it.
//!
//! Guest memory is backed by the in-process hypervisor, so the result can be
//! inspected with `--dump-memory`.

mod cli_args;

use anyhow::Context;
use clap::Parser;
use cli_args::Options;
use guest_loader::bootstrap::GuestBootstrapper;
use guest_loader::bootstrap::LaunchConfig;
use guest_loader::disk::DiskConfig;
use guest_loader::memory::InMemoryHypervisor;
use std::io::BufWriter;
use std::io::Write;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("GUEST_VMM_LOG")
                .from_env_lossy(),
        )
        .init();

    let opts = Options::parse();
    do_main(opts).inspect_err(|err| {
        tracing::error!(
            error = &**err as &dyn std::error::Error,
            "failed to launch guest"
        );
    })
}

fn do_main(opts: Options) -> anyhow::Result<()> {
    let config = LaunchConfig {
        memory_size: opts.memory,
        entry_address: opts.entry,
        kernel_path: opts.kernel,
        boot_image_path: opts.boot,
        disk: opts.disk_template.map(|template| DiskConfig {
            template,
            directory: opts.disk_dir,
        }),
        wait: !opts.no_wait,
    };

    let mut hv = InMemoryHypervisor::new();
    let launched = GuestBootstrapper::new(&mut hv)
        .launch_guest(&config)
        .context("error launching guest")?;

    tracing::info!(
        guest = %launched.guest,
        stage = ?launched.stage,
        entrypoint = launched.kernel.entrypoint,
        disk = ?launched.disk_image,
        "guest launched"
    );

    if let Some(path) = &opts.dump_memory {
        let file = fs_err::File::create(path)?;
        let mut writer = BufWriter::new(file);
        hv.write_memory_image(launched.guest, &mut writer)
            .context("failed to dump guest memory")?;
        writer.flush().context("failed to dump guest memory")?;
        tracing::info!(path = %path.display(), "wrote guest memory image");
    }

    Ok(())
}
