//! Build script rendering the `virtplane` man pages.
//!
//! One page covers the whole tool and one page per subcommand is written
//! next to it as `virtplane-<subcommand>.1`, all in the build output
//! directory where packaging picks them up.

use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render_page(page: Man, target: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    page.render(&mut buffer)?;
    fs::write(target, buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let command = Cli::command();
    for subcommand in command.get_subcommands() {
        let title = format!("virtplane-{}", subcommand.get_name());
        let page = Man::new(subcommand.clone()).title(title.as_str());
        render_page(page, &out_dir.join(format!("{title}.1")))?;
    }
    render_page(Man::new(command), &out_dir.join("virtplane.1"))?;

    Ok(())
}
