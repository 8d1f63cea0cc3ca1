use dbikit::database::{run_self_test, Dialect, LibraryTestResult};
use dbikit::DbikitConfig;
use serde::Serialize;

use super::{open_connection, print_json};

#[derive(Debug, Serialize)]
struct SelfTestReport {
    dialect: Dialect,
    outcome: LibraryTestResult,
}

pub fn run(config: &DbikitConfig, json: bool) {
    let mut conn = match open_connection(config) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let outcome = run_self_test(&mut conn);
    conn.close();
    let passed = outcome.is_pass();

    if json {
        print_json(&SelfTestReport {
            dialect: config.dialect,
            outcome,
        });
    } else {
        match &outcome {
            LibraryTestResult::Pass => println!("{}: large number round trip passed", config.dialect),
            LibraryTestResult::FailSetup(msg) => {
                println!("{}: self-test could not run: {}", config.dialect, msg)
            }
            LibraryTestResult::FailTest(msg) => {
                println!("{}: values did not survive the round trip: {}", config.dialect, msg)
            }
        }
    }

    if !passed {
        std::process::exit(1);
    }
}
