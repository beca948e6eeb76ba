// Copyright 2025 The score-k8s Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::Parser;
use score_k8s::cli::{CliArgs, Commands};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Initialize tracing; logs go to stderr so manifests can go to stdout.
    let level = if args.quiet {
        LevelFilter::ERROR
    } else {
        match args.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(args.verbose > 1)
        .with_writer(std::io::stderr)
        .init();

    // A ctrl-c cancels the in-flight provisioner call; no state is
    // persisted for a cancelled run.
    let cancellation = CancellationToken::new();
    let signal_token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    match args.command {
        Commands::Init(cmd) => cmd.execute().await?,
        Commands::Generate(cmd) => cmd.execute(&cancellation).await?,
        Commands::Provisioners(cmd) => cmd.execute().await?,
        Commands::ConvertWorkloadToManifests(cmd) => cmd.execute().await?,
    }
    Ok(())
}
