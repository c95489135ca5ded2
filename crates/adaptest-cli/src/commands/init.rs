//! The `adaptest init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("adaptest.toml").exists() {
        println!("adaptest.toml already exists, skipping.");
    } else {
        std::fs::write("adaptest.toml", SAMPLE_CONFIG)?;
        println!("Created adaptest.toml");
    }

    std::fs::create_dir_all("item-banks")?;
    let example_path = std::path::Path::new("item-banks/example.toml");
    if example_path.exists() {
        println!("item-banks/example.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_BANK)?;
        println!("Created item-banks/example.toml");
    }

    println!("\nNext steps:");
    println!("  1. Replace item-banks/example.toml with your calibrated items");
    println!("  2. Run: adaptest validate --bank item-banks/example.toml");
    println!("  3. Run: adaptest simulate --bank item-banks/example.toml --theta 0.5");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# adaptest configuration

[estimator]
prior_mean = 0.0
prior_var = 1.0
grid_min = -4.0
grid_max = 4.0
grid_points = 81
max_iterations = 25
step_tolerance = 0.0001
# max_step = 0.25

[selection]
# difficulty_window = 1.0
# randomesque_top_k = 3

[termination]
method = "EAP"
initial_theta = 0.0
max_items = 20
target_se = 0.3
# min_items = 5
# time_limit_secs = 1800

[scale]
theta_min = -3.0
theta_max = 3.0
fail_grade = "F"
"#;

const EXAMPLE_BANK: &str = r#"[bank]
id = "example"
name = "Example Item Bank"
description = "A small bank spanning the ability range"
default_c = 0.2

[[items]]
id = "ex-01"
a = 1.1
b = -2.0

[[items]]
id = "ex-02"
a = 1.3
b = -1.2

[[items]]
id = "ex-03"
a = 1.6
b = -0.5

[[items]]
id = "ex-04"
a = 1.8
b = 0.0

[[items]]
id = "ex-05"
a = 1.5
b = 0.6

[[items]]
id = "ex-06"
a = 1.4
b = 1.3

[[items]]
id = "ex-07"
a = 1.2
b = 2.1
c = 0.1
"#;
