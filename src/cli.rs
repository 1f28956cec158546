// SPDX-License-Identifier: GPL-3.0-only
use crate::models::{DeviceKind, WhisperModelId};
use clap::{ArgAction, Command, arg, command, value_parser};
use std::path::PathBuf;

#[must_use]
pub fn build() -> Command {
    command!()
        .about("Voxkey - local voice typing with on-device Whisper")
        .long_about(
            "Captures speech from a microphone with push-to-talk, toggle, or energy-gated auto \
             listening, transcribes it locally, and delivers the text to the clipboard and the \
             focused window.",
        )
        .subcommand_required(false)
        .arg_required_else_help(false)
        .subcommand(
            Command::new("devices")
                .about("List input devices, ranked, with their probed formats"),
        )
        .subcommand(
            Command::new("test-device")
                .about("Record briefly from a device and report the peak level")
                .arg(
                    arg!(<index> "Device index from `voxkey devices`")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    arg!(-d --duration <seconds> "Capture length")
                        .default_value("0.5")
                        .value_parser(value_parser!(f32)),
                ),
        )
        .subcommand(
            Command::new("listen")
                .about("Auto-listen mode: print each detected utterance as it is transcribed"),
        )
        .subcommand(
            Command::new("record")
                .about("Capture a short test recording from the best device to a WAV file")
                .arg(arg!(<file> "Output WAV path").value_parser(value_parser!(PathBuf)))
                .arg(
                    arg!(-d --duration <seconds> "Capture length")
                        .default_value("3.0")
                        .value_parser(value_parser!(f32)),
                ),
        )
        .subcommand(
            Command::new("transcribe")
                .about("Transcribe a WAV file and print the result")
                .arg(arg!(<file> "Path to a WAV file").value_parser(value_parser!(PathBuf))),
        )
        .arg(
            arg!(-m --model <model> "Whisper model to use")
                .required(false)
                .value_parser(value_parser!(WhisperModelId)),
        )
        .arg(
            arg!(--device <device> "Device for model execution")
                .default_value("auto")
                .value_parser(value_parser!(DeviceKind)),
        )
        .arg(
            arg!(-v --verbose "Enable verbose logging")
                .action(ArgAction::SetTrue),
        )
}
