//! Cross-crate scenarios: settings, builder, and both drive modes

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use ricecoder_command::CommandBuilder;
use ricecoder_process::{ProcessSettings, UnixEnvironment};

fn builder() -> CommandBuilder {
    CommandBuilder::new(Arc::new(UnixEnvironment::new()))
        .poll_interval(Duration::from_millis(5))
        .async_tick(Duration::from_millis(10))
}

#[test]
fn test_settings_file_drives_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("process.toml");
    std::fs::write(
        &path,
        "timeout_us = 150000\nkill_timeout_us = 200000\npoll_interval_us = 5000\n",
    )
    .unwrap();
    let settings = ProcessSettings::load(Some(&path)).unwrap();

    let output = CommandBuilder::new(Arc::new(UnixEnvironment::new()))
        .with_settings(&settings)
        .command("sleep")
        .argument("30")
        .build()
        .unwrap()
        .run_synchronous()
        .unwrap();

    assert_eq!(output.exit_code(), -15);
}

#[tokio::test]
async fn test_sync_and_async_drains_agree() {
    let command = builder()
        .command("sh")
        .raw_argument("-c 'printf \"one\\ntwo\\n\"; printf oops >&2; exit 7'")
        .build()
        .unwrap();

    let sync_output = command.run_synchronous().unwrap();
    let async_output = command
        .run_asynchronous()
        .unwrap()
        .wait_async()
        .await
        .unwrap_err();

    assert_eq!(sync_output, async_output);
    assert_eq!(sync_output.exit_code(), 7);
    assert_eq!(sync_output.stdout_lines(), vec!["one", "two", ""]);
    assert_eq!(sync_output.stderr_lines(), vec!["oops"]);
}

#[test]
fn test_output_serializes_for_reporting() {
    let output = builder()
        .command("echo")
        .argument("report")
        .build()
        .unwrap()
        .run_synchronous()
        .unwrap();

    let json = serde_json::to_value(&output).unwrap();
    assert_eq!(json["exit_code"], 0);
    assert_eq!(json["stdout"], "report\n");
    assert_eq!(json["command"], "echo 'report'");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_escaped_arguments_reach_the_child_verbatim(arg in "[ -~]{0,32}") {
        let output = builder()
            .command("printf")
            .raw_argument("%s")
            .argument(arg.clone())
            .build()
            .unwrap()
            .run_synchronous()
            .unwrap();

        prop_assert_eq!(output.exit_code(), 0);
        prop_assert_eq!(output.stdout(), arg.as_str());
    }
}
