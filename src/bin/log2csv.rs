use clap::{App, Arg};
use regex::Regex;
use std::{fs::File, io::Read, path::Path};

// Scrapes terminal trial lines out of run logs into CSV for analysis.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("creationrepro")
        .arg(
            Arg::new("log_dir_path")
                .short('p')
                .long("log_dir_path")
                .takes_value(true)
                .default_value("."),
        )
        .get_matches();
    let dir_path = matches.value_of("log_dir_path").unwrap();

    println!("database,result,reason");
    let dir = std::fs::read_dir(dir_path)?;
    for entry in dir {
        let entry = entry?;
        if entry.file_type()?.is_file() && entry.file_name().to_str().unwrap().ends_with(".log") {
            let res = one_file(entry.path())?;
            if !res.is_empty() {
                println!("{}", res.join("\n"));
            }
        }
    }

    Ok(())
}

fn one_file(filepath: impl AsRef<Path>) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut file = File::open(filepath)?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;

    let completed = Regex::new(r"Database (\w+) lifecycle completed")?;
    let abandoned = Regex::new(r"Database (\w+) abandoned: ([^,]+)")?;

    let mut res = vec![];
    for line in content.lines() {
        if let Some(captures) = completed.captures(line) {
            res.push(format!("{},completed,", &captures[1]));
        } else if let Some(captures) = abandoned.captures(line) {
            res.push(format!(
                "{},abandoned,\"{}\"",
                &captures[1],
                captures[2].trim()
            ));
        }
    }
    Ok(res)
}
