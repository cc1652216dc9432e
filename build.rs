// Build script for the Flashblocks race
// Copies the sample config file next to the build output

use std::env;
use std::fs;
use std::path::Path;

const CONFIG_FILE: &str = "flashblock_race.toml";

fn main() {
    println!("cargo:rerun-if-changed={CONFIG_FILE}");

    let Ok(out_dir) = env::var("OUT_DIR") else {
        return;
    };

    // OUT_DIR = target/<profile>/build/<crate>-<hash>/out
    let Some(target_dir) = Path::new(&out_dir).ancestors().nth(3) else {
        println!("cargo:warning=Could not find target directory");
        return;
    };

    let config_src = Path::new(CONFIG_FILE);
    let config_dst = target_dir.join(CONFIG_FILE);

    if config_src.exists() {
        match fs::copy(config_src, &config_dst) {
            Ok(_) => println!(
                "cargo:warning=Copied config file to {}",
                config_dst.display()
            ),
            Err(e) => println!("cargo:warning=Failed to copy config file: {e}"),
        }
    }
}
