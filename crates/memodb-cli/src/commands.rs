use std::io::{IsTerminal, Read, Write};
use std::path::Path;

use anyhow::{bail, Context};
use memodb::{cbor, Cid, Name, PathStep, Store, Uri};

use crate::cli::{Cli, Command, OutputFormat};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let store = open_store(&cli.store)?;
    match cli.command {
        Command::Get(args) => cmd_get(store.as_ref(), args),
        Command::Put(args) => cmd_put(store.as_ref(), args),
        Command::Set(args) => cmd_set(store.as_ref(), args),
        Command::Delete(args) => cmd_delete(store.as_ref(), args),
        Command::Invalidate(args) => cmd_invalidate(store.as_ref(), args),
        Command::ListHeads => {
            let lines: Vec<String> = store
                .list_heads()?
                .into_iter()
                .map(|head| head.to_string())
                .collect();
            emit_lines(&cli.format, lines)
        }
        Command::ListFuncs => emit_lines(&cli.format, store.list_funcs()?),
        Command::ListCalls(args) => {
            let lines: Vec<String> = store
                .list_calls(&args.func)?
                .into_iter()
                .map(|call| call.to_string())
                .collect();
            emit_lines(&cli.format, lines)
        }
        Command::RefsTo(args) => {
            let cid = resolve_target(store.as_ref(), &args.name)?;
            let lines: Vec<String> = store
                .names_using(&cid)?
                .into_iter()
                .map(|name| name.to_string())
                .collect();
            emit_lines(&cli.format, lines)
        }
        Command::PathsTo(args) => {
            let cid = resolve_target(store.as_ref(), &args.name)?;
            let lines: Vec<String> = store
                .list_paths_to(&cid)?
                .into_iter()
                .map(|(root, path)| format_path(&root, &path))
                .collect();
            emit_lines(&cli.format, lines)
        }
        Command::Export(args) => {
            let root = memodb::export(store.as_ref(), &args.path)?;
            println!("{}", root.to_text());
            Ok(())
        }
    }
}

fn open_store(uri: &Option<String>) -> anyhow::Result<Box<dyn Store>> {
    let store = match uri {
        Some(uri) => memodb::open(uri),
        None => memodb::open_default(),
    };
    store.context("opening store (pass --store or set MEMODB_STORE)")
}

fn cmd_get(store: &dyn Store, args: crate::cli::GetArgs) -> anyhow::Result<()> {
    let name = Name::parse(&args.name)?;
    let cid = store.resolve(&name)?;
    let node = store.get(&cid)?;
    let bytes = cbor::encode(&node);
    match args.output {
        Some(path) => {
            std::fs::write(&path, bytes)
                .with_context(|| format!("writing {}", path.display()))?;
        }
        None => {
            let mut stdout = std::io::stdout();
            if stdout.is_terminal() && !args.force {
                bail!("refusing to write binary CBOR to a terminal (use -f to force)");
            }
            stdout.write_all(&bytes)?;
        }
    }
    Ok(())
}

fn cmd_put(store: &dyn Store, args: crate::cli::PutArgs) -> anyhow::Result<()> {
    let cid = read_input_cid(store, &args.input)?;
    println!("{}", cid.to_text());
    Ok(())
}

fn cmd_set(store: &dyn Store, args: crate::cli::SetArgs) -> anyhow::Result<()> {
    let name = Name::parse(&args.name)?;
    let cid = read_input_cid(store, &args.input)?;
    store.set(&name, &cid)?;
    Ok(())
}

fn cmd_delete(store: &dyn Store, args: crate::cli::DeleteArgs) -> anyhow::Result<()> {
    match Name::parse(&args.name)? {
        Name::Head(head) => {
            store.head_delete(&head)?;
            Ok(())
        }
        _ => bail!("delete expects a /head/ URI"),
    }
}

fn cmd_invalidate(store: &dyn Store, args: crate::cli::InvalidateArgs) -> anyhow::Result<()> {
    store.call_invalidate(&args.func)?;
    Ok(())
}

/// Resolve an input URI to a CID: `-` reads CBOR from stdin, `file:<path>`
/// reads CBOR from a file, anything else is a name resolved in the store.
fn read_input_cid(store: &dyn Store, input: &str) -> anyhow::Result<Cid> {
    let bytes = if input == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        buf
    } else {
        let uri = Uri::parse(input)?;
        if uri.scheme == "file" {
            let path = uri.file_path();
            std::fs::read(Path::new(&path)).with_context(|| format!("reading {path}"))?
        } else {
            let name = Name::parse(input)?;
            return Ok(store.resolve(&name)?);
        }
    };
    let node = cbor::decode(&bytes)?;
    Ok(store.put(&node)?)
}

/// Resolve a target for reverse-reference commands.
fn resolve_target(store: &dyn Store, name: &str) -> anyhow::Result<Cid> {
    Ok(store.resolve(&Name::parse(name)?)?)
}

fn format_path(root: &Name, path: &[PathStep]) -> String {
    if path.is_empty() {
        return root.to_string();
    }
    let steps: Vec<String> = path.iter().map(PathStep::to_string).collect();
    format!("{root}\t{}", steps.join("/"))
}

fn emit_lines(format: &OutputFormat, lines: Vec<String>) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => {
            for line in lines {
                println!("{line}");
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&lines)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use memodb::{Head, Node};

    fn temp_store() -> (tempfile::TempDir, Box<dyn Store>) {
        let dir = tempfile::tempdir().unwrap();
        let store = memodb::open(&format!("sqlite:{}/cli.db", dir.path().display())).unwrap();
        (dir, store)
    }

    #[test]
    fn read_input_cid_from_file() {
        let (dir, store) = temp_store();
        let path = dir.path().join("value.cbor");
        std::fs::write(&path, cbor::encode(&Node::Int(7))).unwrap();

        let cid = read_input_cid(store.as_ref(), &format!("file:{}", path.display())).unwrap();
        assert_eq!(store.get(&cid).unwrap(), Node::Int(7));
    }

    #[test]
    fn read_input_cid_from_name() {
        let (_dir, store) = temp_store();
        let cid = store.put(&Node::from("already stored")).unwrap();
        store.set(&Name::Head(Head::new("h")), &cid).unwrap();

        let resolved = read_input_cid(store.as_ref(), "/head/h").unwrap();
        assert_eq!(resolved, cid);
        let direct = read_input_cid(store.as_ref(), &format!("/cid/{cid}")).unwrap();
        assert_eq!(direct, cid);
    }

    #[test]
    fn read_input_rejects_garbage_cbor() {
        let (dir, store) = temp_store();
        let path = dir.path().join("bad.cbor");
        std::fs::write(&path, [0xff, 0xff]).unwrap();
        assert!(
            read_input_cid(store.as_ref(), &format!("file:{}", path.display())).is_err()
        );
    }

    #[test]
    fn format_path_renders_steps() {
        let root = Name::Head(Head::new("root"));
        let path = [
            PathStep::Key("items".into()),
            PathStep::Index(2),
        ];
        assert_eq!(format_path(&root, &path), "/head/root\titems/2");
        assert_eq!(format_path(&root, &[]), "/head/root");
    }
}
