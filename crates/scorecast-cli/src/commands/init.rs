//! The `scorecast init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("scorecast.toml").exists() {
        println!("scorecast.toml already exists, skipping.");
    } else {
        std::fs::write("scorecast.toml", SAMPLE_CONFIG)?;
        println!("Created scorecast.toml");
    }

    std::fs::create_dir_all("exams")?;
    std::fs::create_dir_all("keys")?;
    for (path, content) in [
        ("exams/example.toml", EXAMPLE_EXAM),
        ("keys/example.toml", EXAMPLE_KEY),
    ] {
        let path = std::path::Path::new(path);
        if path.exists() {
            println!("{} already exists, skipping.", path.display());
        } else {
            std::fs::write(path, content)?;
            println!("Created {}", path.display());
        }
    }

    println!("\nNext steps:");
    println!("  1. Run: scorecast validate --exam exams/example.toml");
    println!("  2. Run: scorecast exam add --exam exams/example.toml");
    println!("  3. Register candidates, submit answers, then run: scorecast reconcile");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# scorecast configuration

parallelism = 4
stale_write_retries = 1
percentiles = [0.10, 0.20]
report_dir = "./scorecast-reports"

[store]
type = "file"
path = "scorecast-store.json"

[bands]
top = 0.27
mid = 0.73
"#;

const EXAMPLE_EXAM: &str = r#"[exam]
year = 2025
kind = "mock"
round = 1
option_count = 5
aggregate = "sum"
categories = ["north", "south"]

[exam.schedule]
page_opened_at = "2025-03-01T00:00:00Z"
exam_started_at = "2025-03-08T09:00:00Z"
exam_finished_at = "2025-03-08T12:00:00Z"
predicted_key_opened_at = "2025-03-08T18:00:00Z"
official_key_opened_at = "2025-03-10T09:00:00Z"
predict_closed_at = "2025-03-20T00:00:00Z"

[[subjects]]
code = "verbal"
name = "Verbal Logic"
question_count = 5

[[subjects]]
code = "data"
name = "Data Interpretation"
question_count = 5
"#;

const EXAMPLE_KEY: &str = r#"exam = "2025-mock-1"

[answers]
verbal = [1, 2, 3, 4, 5]
data = [5, 4, 3, 2, 1]
"#;
