//! Repository publishing CLI commands
//!
//! Provides commands for creating a repository and building it from
//! module source trees.

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::PathBuf;

use modhub_core::repositories::{
    build_repository, create_repository, BuildReport, GpgSigner, ManifestIntrospector, Signer,
};

#[derive(Subcommand, Debug)]
pub enum RepoCommand {
    /// Create an empty repository
    Create {
        /// Repository name
        name: String,

        /// Repository directory (defaults to the current directory)
        #[clap(default_value = ".")]
        path: PathBuf,

        /// Maintainer, e.g. "Repo Team <team@example.org>"
        #[clap(long)]
        maintainer: String,
    },

    /// Rebuild index, packages and signatures from module sources
    Build {
        /// Directory holding one subdirectory per module
        source: PathBuf,

        /// Repository directory created with `repo create`
        repository: PathBuf,

        /// Key used to sign the keyring, index and packages
        #[clap(long)]
        sign_key: Option<String>,

        /// gpg binary used for signing
        #[clap(long, default_value = "gpg")]
        gpg: PathBuf,
    },
}

impl RepoCommand {
    pub async fn execute(self) -> Result<()> {
        match self {
            RepoCommand::Create {
                name,
                path,
                maintainer,
            } => {
                let index = create_repository(&path, &name, &maintainer)?;
                println!("Created repository '{name}' ({})", index.display());
                Ok(())
            }
            RepoCommand::Build {
                source,
                repository,
                sign_key,
                gpg,
            } => {
                let report = tokio::task::spawn_blocking(move || {
                    let signer = sign_key.map(|key| GpgSigner::new(gpg, key));
                    build_repository(
                        &source,
                        &repository,
                        &ManifestIntrospector,
                        signer.as_ref().map(|s| s as &dyn Signer),
                    )
                })
                .await
                .context("Build worker stopped unexpectedly")??;

                print_report(&report);
                Ok(())
            }
        }
    }
}

fn print_report(report: &BuildReport) {
    println!("Indexed {} module(s)", report.modules.len());
    for name in &report.archives {
        println!("  packed   {name} ({})", report.modules[name]);
    }
    for name in &report.icons {
        println!("  icon     {name}");
    }
    if report.keyring_rebuilt {
        println!("  keyring  rebuilt");
    }
    for signature in &report.signatures {
        println!("  signed   {}", signature.display());
    }
    if report.unsigned {
        eprintln!("Warning: the repository has keys but no --sign-key was given, nothing was signed");
    }
}
