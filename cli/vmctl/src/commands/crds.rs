//! CRD manifests.

use anyhow::Result;
use clap::Args;
use kube::ResourceExt;

use crate::output::{print_documents, print_info};

use super::CommandContext;

/// Print the CustomResourceDefinitions for all vmkit resources.
#[derive(Debug, Args)]
pub struct CrdsCommand {}

impl CrdsCommand {
    pub fn run(self, ctx: CommandContext) -> Result<()> {
        let crds = vmkit_api::crds();
        for crd in &crds {
            print_info(&format!("CustomResourceDefinition {}", crd.name_any()));
        }
        print_documents(&crds, ctx.format)
    }
}
