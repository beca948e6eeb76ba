// CLI command definitions

use super::convert::ConvertWorkloadToManifestsCommand;
use super::generate::GenerateCommand;
use super::init::InitCommand;
use super::provisioners::ProvisionersCommand;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "score-k8s",
    version,
    about = "Score to Kubernetes manifest translator",
    long_about = "Score is a specification for defining environment agnostic configuration for \
                  cloud based workloads.\nThis tool produces a file of Kubernetes manifests from \
                  the Score specification."
)]
pub struct CliArgs {
    /// Mute any logging output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Increase log verbosity and detail by specifying this flag one or more times
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Initialise a new score-k8s project with local state directory and sample score file
    Init(InitCommand),

    /// Convert one or more Score files into a set of Kubernetes manifests
    Generate(GenerateCommand),

    /// List the provisioners available in this project
    Provisioners(ProvisionersCommand),

    /// Convert workload inputs piped on stdin into a manifest array on stdout
    #[command(name = "convert-workload-to-manifests", hide = true)]
    ConvertWorkloadToManifests(ConvertWorkloadToManifestsCommand),
}
