use std::io::Write;
use std::path::Path;

use clap::Parser;

use atomspec::{cli, compiler, document, fill, lint, snapshot, validator};

fn main() {
    let cli = cli::Cli::parse();

    env_logger::Builder::new()
        .format(|buf, record| writeln!(buf, "{}:\n{}", record.level(), record.args()))
        .filter_level(cli.verbose.log_level_filter())
        .target(env_logger::fmt::Target::Stdout)
        .init();

    match cli.command {
        cli::Command::Validate {
            document,
            snapshot: snapshot_arg,
            out_dir,
            lint,
        } => {
            let loaded = load_or_exit(&document.document);
            let snapshot = snapshot::Snapshot::new(&snapshot_arg.snapshot);
            let errors = validator::validate(
                &loaded,
                &snapshot,
                &out_dir.out_dir,
                lint_runner(&lint).as_ref(),
                true,
            );
            if !errors.is_empty() {
                for error in &errors {
                    eprintln!("{error}");
                }
                std::process::exit(1);
            }
            log::info!("validation passed: {} atoms", loaded.document.atoms.len());
        }
        cli::Command::Compile {
            document,
            snapshot: snapshot_arg,
            out_dir,
            lint,
            inline_excerpts,
            no_verify,
        } => {
            let loaded = load_or_exit(&document.document);
            let snapshot = snapshot::Snapshot::new(&snapshot_arg.snapshot);
            if !no_verify {
                // The compiler never trusts unverified citations. A missing
                // prior manifest is fine here: this compile will write it.
                let errors = validator::validate(
                    &loaded,
                    &snapshot,
                    &out_dir.out_dir,
                    lint_runner(&lint).as_ref(),
                    false,
                );
                if !errors.is_empty() {
                    for error in &errors {
                        eprintln!("{error}");
                    }
                    std::process::exit(1);
                }
            }
            match compiler::compile(
                &loaded,
                Some(&snapshot),
                &out_dir.out_dir,
                compiler::CompileOptions { inline_excerpts },
            ) {
                Ok(manifest) => {
                    log::info!(
                        "compiled {} artifacts into {} (version {})",
                        manifest.artifact_hashes.len(),
                        out_dir.out_dir.display(),
                        manifest.version
                    );
                }
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(1);
                }
            }
        }
        cli::Command::Fill {
            document,
            snapshot: snapshot_arg,
            dry_run,
        } => {
            let loaded = load_or_exit(&document.document);
            let snapshot = snapshot::Snapshot::new(&snapshot_arg.snapshot);
            match fill::plan_fills(&loaded.document, &snapshot) {
                Err(errors) => {
                    for error in &errors {
                        eprintln!("{error}");
                    }
                    std::process::exit(1);
                }
                Ok(proposals) => {
                    for proposal in &proposals {
                        println!(
                            "{} ref {} -> lines [{},{}]",
                            proposal.atom_id, proposal.file, proposal.range.start, proposal.range.end
                        );
                    }
                    if proposals.is_empty() {
                        log::info!("nothing to fill; all references carry ranges");
                    } else if dry_run {
                        log::info!("dry run: {} proposals not written", proposals.len());
                    } else {
                        let mut updated = loaded.document.clone();
                        fill::apply_fills(&mut updated, &proposals);
                        if let Err(e) = fill::write_document(&loaded.path, &updated) {
                            eprintln!("{e}");
                            std::process::exit(1);
                        }
                        log::info!("filled {} reference ranges", proposals.len());
                    }
                }
            }
        }
    }
}

fn load_or_exit(path: &Path) -> document::LoadedDocument {
    match document::load(path) {
        Ok(loaded) => loaded,
        Err(document::LoadError::Structural(messages)) => {
            for message in messages {
                eprintln!("structural: {message}");
            }
            std::process::exit(1);
        }
        Err(document::LoadError::Schema(message)) => {
            eprintln!("schema: {message}");
            std::process::exit(1);
        }
        Err(document::LoadError::Io(message)) => {
            eprintln!("{message}");
            std::process::exit(1);
        }
    }
}

fn lint_runner(args: &cli::LintArgs) -> Option<lint::LintRunner> {
    match (&args.lint_cmd, &args.ruleset) {
        (Some(command), Some(ruleset)) => Some(lint::LintRunner::new(command, ruleset)),
        _ => None,
    }
}
