//! Finish phases

use crate::core::data::{FieldSpec, StepData};
use crate::core::error::{ErrorKind, Result};
use crate::guest::GuestHandle;
use crate::plugin::{FinishPlugin, Method, PhaseContext};
use crate::plugins::script::{run_scripts, FINISH_WRAPPER_FILENAME};
use async_trait::async_trait;

const SHELL_FIELDS: &[FieldSpec] = &[FieldSpec::list("script", "Shell script to be executed. Can be used multiple times.")
    .with_short('s')
    .with_metavar("SCRIPT")];

pub const SHELL: Method = Method::new("shell", "Run cleanup scripts on the guest.", 50, SHELL_FIELDS);

pub struct ShellFinish;

#[async_trait]
impl FinishPlugin for ShellFinish {
    async fn go(&self, ctx: &PhaseContext, data: &StepData, guest: &GuestHandle) -> Result<()> {
        run_scripts(
            ctx,
            data,
            guest,
            data.list("script"),
            FINISH_WRAPPER_FILENAME,
            ErrorKind::Finish,
        )
        .await
    }
}
