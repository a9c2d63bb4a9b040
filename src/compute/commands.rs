//! Per-frame command sequence.
//!
//! The work for one frame is first described as a [`CommandSequence`]: an
//! ordered list of layout transitions, copies and the dispatch. The plan is
//! checked by [`CommandSequence::validate`] so the upload → dispatch → read
//! ordering is enforced in one place, then encoded into a wgpu command
//! buffer.
//!
//! wgpu tracks resource usage itself and inserts the actual pipeline
//! barriers between the recorded commands; transitions in the plan encode
//! nothing and exist to state (and check) the required ordering.

use crate::compute::engine::SlotResources;
use crate::gpu::kernel::{PixelateKernel, PixelateParams};
use std::fmt;
use thiserror::Error;

/// Access layout of an image at a point in the command sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayout {
    /// Contents undefined and may be discarded
    Undefined,
    /// Destination of a transfer
    TransferDst,
    /// Shader-accessible storage image
    General,
    /// Source of a transfer
    TransferSrc,
}

/// Which of a slot's images a command refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Input,
    Output,
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageRole::Input => "INPUT",
            ImageRole::Output => "OUTPUT",
        })
    }
}

/// One step of a frame's command sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Layout transition barrier
    Transition {
        image: ImageRole,
        from: ImageLayout,
        to: ImageLayout,
    },
    /// Staging buffer → INPUT image
    Upload,
    /// Pixelation dispatch over `workgroups` tiles
    Dispatch {
        workgroups: (u32, u32),
        params: PixelateParams,
    },
    /// OUTPUT image → readback buffer
    Readback,
}

/// A command sequence that violates the required ordering.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("command {index} ({command:?}) is invalid: {reason}")]
pub struct PlanError {
    pub index: usize,
    pub command: Command,
    pub reason: String,
}

/// Ordered commands for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSequence {
    commands: Vec<Command>,
}

impl CommandSequence {
    /// The standard frame: upload, transform and optionally read back.
    pub fn pixelate(workgroups: (u32, u32), params: PixelateParams, readback: bool) -> Self {
        use Command::*;
        use ImageLayout::*;
        use ImageRole::*;

        let mut commands = vec![
            Transition { image: Input, from: Undefined, to: TransferDst },
            Upload,
            Transition { image: Input, from: TransferDst, to: General },
            Transition { image: Output, from: Undefined, to: General },
            Dispatch { workgroups, params },
        ];
        if readback {
            commands.push(Transition { image: Output, from: General, to: TransferSrc });
            commands.push(Readback);
        }
        Self { commands }
    }

    /// Build a sequence from explicit commands.
    pub fn from_commands(commands: Vec<Command>) -> Self {
        Self { commands }
    }

    /// The commands, in submission order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Check layout and ordering rules:
    /// - a transition's `from` matches the image's current layout
    ///   (`Undefined` may be entered from anything)
    /// - the upload writes INPUT in `TransferDst`
    /// - the dispatch follows an upload and sees both images in `General`
    /// - the readback follows a dispatch and reads OUTPUT in `TransferSrc`
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut input = ImageLayout::Undefined;
        let mut output = ImageLayout::Undefined;
        let mut uploaded = false;
        let mut dispatched = false;

        for (index, command) in self.commands.iter().enumerate() {
            let fail = |reason: String| {
                Err(PlanError {
                    index,
                    command: *command,
                    reason,
                })
            };
            match *command {
                Command::Transition { image, from, to } => {
                    let current = match image {
                        ImageRole::Input => &mut input,
                        ImageRole::Output => &mut output,
                    };
                    if from != ImageLayout::Undefined && from != *current {
                        return fail(format!("{image} is in {current:?}, not {from:?}"));
                    }
                    *current = to;
                }
                Command::Upload => {
                    if input != ImageLayout::TransferDst {
                        return fail(format!("INPUT is in {input:?}"));
                    }
                    uploaded = true;
                }
                Command::Dispatch { workgroups, params } => {
                    if !uploaded {
                        return fail("dispatch before upload".to_string());
                    }
                    if input != ImageLayout::General || output != ImageLayout::General {
                        return fail(format!("images are in {input:?}/{output:?}"));
                    }
                    if params.block_size == 0 {
                        return fail("block size 0".to_string());
                    }
                    if workgroups.0 == 0 || workgroups.1 == 0 {
                        return fail("empty dispatch".to_string());
                    }
                    dispatched = true;
                }
                Command::Readback => {
                    if !dispatched {
                        return fail("readback before dispatch".to_string());
                    }
                    if output != ImageLayout::TransferSrc {
                        return fail(format!("OUTPUT is in {output:?}"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Record the sequence for one slot.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        kernel: &PixelateKernel,
        slot: &SlotResources,
    ) {
        for command in &self.commands {
            match *command {
                Command::Transition { image, from, to } => {
                    log::trace!("barrier {image}: {from:?} -> {to:?}");
                }
                Command::Upload => slot.staging.copy_to_image(encoder, &slot.input),
                Command::Dispatch { workgroups, params } => {
                    kernel.dispatch(encoder, &slot.bind_group, params, workgroups)
                }
                Command::Readback => {
                    if let Some(readback) = &slot.readback {
                        readback.copy_from_image(encoder, &slot.output);
                    }
                }
            }
        }
    }
}
