use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use jclassfile::attributes::Attribute;
use jclassfile::class_file;
use jdescriptor::{MethodDescriptor, TypeDescriptor};
use zip::ZipArchive;

use crate::bytecode::{ClassHeader, RawHandler, decode_code, parse_header};
use crate::classpath::{ClassPath, Runtime};
use crate::ir::{ACC_STATIC, ClassNode, FieldNode, MethodNode};
use crate::library::Library;

/// Reads owned inputs, dependencies and the optional platform jar into a fresh class path.
pub(crate) fn read_classpath(
    inputs: &[PathBuf],
    dependencies: &[PathBuf],
    runtime: Option<&Path>,
) -> Result<ClassPath> {
    let libraries = inputs
        .iter()
        .map(|path| read_library(path))
        .collect::<Result<Vec<_>>>()?;
    let dependencies = dependencies
        .iter()
        .map(|path| read_library(path))
        .collect::<Result<Vec<_>>>()?;
    let runtime = runtime.map(read_library).transpose()?;
    Ok(ClassPath::new(libraries, dependencies, Runtime::new(runtime)))
}

/// Reads a `.jar`, a `.class` file or a directory of classes as one library named after the
/// path's file stem.
pub(crate) fn read_library(path: &Path) -> Result<Library> {
    if !path.exists() {
        anyhow::bail!("input not found: {}", path.display());
    }
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .with_context(|| format!("no library name in {}", path.display()))?;
    let mut library = Library::new(name);

    if path.is_dir() {
        for file in class_files(path)? {
            let data = fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
            let class = parse_class(&data).with_context(|| format!("failed to parse {}", file.display()))?;
            add_class(&mut library, class, &file.display().to_string())?;
        }
    } else {
        match path.extension().and_then(|ext| ext.to_str()).unwrap_or("") {
            "class" => {
                let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
                let class =
                    parse_class(&data).with_context(|| format!("failed to parse {}", path.display()))?;
                add_class(&mut library, class, &path.display().to_string())?;
            }
            "jar" => read_jar(path, &mut library)?,
            _ => anyhow::bail!("unsupported input file: {}", path.display()),
        }
    }
    tracing::debug!(library = %library.name, classes = library.len(), "read library");
    Ok(library)
}

fn add_class(library: &mut Library, class: ClassNode, source: &str) -> Result<()> {
    let name = class.name.clone();
    if library.add(class).is_some() {
        anyhow::bail!("duplicate class {name} in library {} ({source})", library.name);
    }
    Ok(())
}

/// `.class` files under `path`, in sorted order.
fn class_files(path: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in
        fs::read_dir(path).with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }
    entries.sort();

    let mut files = Vec::new();
    for entry in entries {
        if entry.is_dir() {
            files.extend(class_files(&entry)?);
        } else if is_class_entry(&entry.to_string_lossy()) {
            files.push(entry);
        }
    }
    Ok(files)
}

fn is_class_entry(name: &str) -> bool {
    name.ends_with(".class") && !name.ends_with("module-info.class")
}

fn read_jar(path: &Path, library: &mut Library) -> Result<()> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if !entry.is_dir() && is_class_entry(entry.name()) {
            entry_names.push(entry.name().to_string());
        }
    }
    entry_names.sort();

    for name in entry_names {
        let mut entry = archive
            .by_name(&name)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let class =
            parse_class(&data).with_context(|| format!("failed to parse {}:{}", path.display(), name))?;
        add_class(library, class, &format!("{}:{}", path.display(), name))?;
    }
    Ok(())
}

/// Parses class file bytes into the symbolic class model.
pub(crate) fn parse_class(data: &[u8]) -> Result<ClassNode> {
    let header = parse_header(data)?;
    let class_file = class_file::parse(data).context("failed to parse class structure")?;
    let pool = &header.pool;

    let name = pool.class_name(header.this_class).context("resolve class name")?;
    let super_name = if header.super_class == 0 {
        None
    } else {
        Some(
            pool.class_name(header.super_class)
                .context("resolve super class name")?,
        )
    };
    let interfaces = class_file
        .interfaces()
        .iter()
        .map(|index| pool.class_name(*index).context("resolve interface name"))
        .collect::<Result<Vec<_>>>()?;

    let mut fields = Vec::new();
    for field in class_file.fields() {
        let name = pool.utf8(field.name_index()).context("resolve field name")?;
        let desc = pool
            .utf8(field.descriptor_index())
            .context("resolve field descriptor")?;
        TypeDescriptor::from_str(&desc)
            .with_context(|| format!("invalid descriptor {desc} for field {name}"))?;
        fields.push(FieldNode {
            access: field.access_flags().bits(),
            name,
            desc,
        });
    }

    let mut methods = Vec::new();
    for method in class_file.methods() {
        let access = method.access_flags().bits();
        let name = pool.utf8(method.name_index()).context("resolve method name")?;
        let desc = pool
            .utf8(method.descriptor_index())
            .context("resolve method descriptor")?;
        MethodDescriptor::from_str(&desc)
            .with_context(|| format!("invalid descriptor {desc} for method {name}"))?;
        let code = method
            .attributes()
            .iter()
            .find_map(|attribute| match attribute {
                Attribute::Code {
                    max_stack,
                    code,
                    exception_table,
                    ..
                } => Some((*max_stack, code, exception_table)),
                _ => None,
            })
            .map(|(max_stack, code, exception_table)| {
                let handlers: Vec<RawHandler> = exception_table
                    .iter()
                    .map(|record| RawHandler {
                        start_pc: record.start_pc(),
                        end_pc: record.end_pc(),
                        handler_pc: record.handler_pc(),
                        catch_type: record.catch_type(),
                    })
                    .collect();
                decode_code(code, &handlers, pool, access & ACC_STATIC != 0, &desc).map(|mut decoded| {
                    decoded.max_stack = max_stack;
                    decoded
                })
            })
            .transpose()
            .with_context(|| format!("failed to decode {name}{desc}"))?;
        methods.push(MethodNode {
            access,
            name,
            desc,
            code,
        });
    }

    let method_handles = pool.method_handles().context("resolve method handles")?;

    let ClassHeader {
        minor,
        major,
        access,
        ..
    } = header;
    Ok(ClassNode {
        version: (major, minor),
        access,
        name,
        super_name,
        interfaces,
        fields,
        methods,
        method_handles,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::opcodes;
    use crate::test_support::{class_bytes, field_insn, invoke, op, var};

    #[test]
    fn parse_class_decodes_members_and_code() {
        let class = parse_class(&class_bytes("p/Foo", "I")).expect("parse class");

        assert_eq!(class.name, "p/Foo");
        assert_eq!(class.super_name.as_deref(), Some("java/lang/Object"));
        assert_eq!(class.version, (52, 0));
        assert_eq!(class.fields[0].name, "x");
        assert_eq!(class.fields[0].desc, "I");
        let get = &class.methods[1];
        assert_eq!((get.name.as_str(), get.desc.as_str()), ("get", "()I"));
        let code = get.code.as_ref().expect("code");
        assert_eq!(
            code.instructions,
            vec![
                var(opcodes::ALOAD, 0),
                field_insn(opcodes::GETFIELD, "p/Foo", "x", "I"),
                op(opcodes::IRETURN),
            ]
        );
        let init = class.methods[0].code.as_ref().expect("code");
        assert_eq!(
            init.instructions[1],
            invoke(opcodes::INVOKESPECIAL, "java/lang/Object", "<init>", "()V")
        );
        assert_eq!(init.max_stack, 1);
    }

    #[test]
    fn malformed_descriptors_are_rejected() {
        let result = parse_class(&class_bytes("p/Foo", "Lunterminated"));

        assert!(result.is_err());
    }

    #[test]
    fn jar_entries_become_one_library_named_after_the_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let jar_path = dir.path().join("client.jar");
        let file = fs::File::create(&jar_path).expect("create jar");
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (entry, class) in [("b.class", "b"), ("a.class", "a")] {
            writer.start_file(entry, options).expect("start entry");
            writer.write_all(&class_bytes(class, "I")).expect("write entry");
        }
        writer.start_file("module-info.class", options).expect("start entry");
        writer.write_all(b"not a class").expect("write entry");
        writer.start_file("META-INF/MANIFEST.MF", options).expect("start entry");
        writer.write_all(b"Manifest-Version: 1.0\n").expect("write entry");
        writer.finish().expect("finish jar");

        let library = read_library(&jar_path).expect("read jar");

        assert_eq!(library.name, "client");
        let names: Vec<&str> = library.iter().map(|class| class.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn directories_are_read_recursively() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = dir.path().join("classes");
        fs::create_dir_all(root.join("p")).expect("create dirs");
        fs::write(root.join("p").join("Foo.class"), class_bytes("p/Foo", "I")).expect("write class");
        fs::write(root.join("Bar.class"), class_bytes("Bar", "I")).expect("write class");
        fs::write(root.join("notes.txt"), b"ignored").expect("write text");

        let classpath = read_classpath(&[root], &[], None).expect("read classpath");

        assert_eq!(classpath.libraries()[0].name, "classes");
        assert!(classpath.class_node("p/Foo").is_some());
        assert!(classpath.class_node("Bar").is_some());
    }

    #[test]
    fn duplicate_classes_in_one_library_are_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = dir.path().join("classes");
        fs::create_dir_all(&root).expect("create dir");
        fs::write(root.join("One.class"), class_bytes("Same", "I")).expect("write class");
        fs::write(root.join("Two.class"), class_bytes("Same", "I")).expect("write class");

        let error = match read_library(&root) {
            Ok(_) => panic!("expected a duplicate error"),
            Err(error) => error,
        };

        assert!(error.to_string().contains("duplicate class Same"));
    }

    #[test]
    fn invalid_class_files_report_their_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("bad.class");
        fs::write(&path, b"nope").expect("write class");

        let error = match read_library(&path) {
            Ok(_) => panic!("expected a parse error"),
            Err(error) => error,
        };

        assert!(error.to_string().contains("bad.class"));
    }
}
