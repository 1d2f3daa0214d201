use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use anyhow::Result;

use crate::ir::{
    ACC_FINAL, ACC_INTERFACE, ACC_NATIVE, ACC_PROTECTED, ACC_PUBLIC, ACC_STATIC, ClassNode,
    MemberDesc, MemberRef,
};
use crate::library::Library;
use crate::remap::Remapper;

/// Read-only view of one class, captured when it was resolved.
#[derive(Clone, Debug)]
pub(crate) struct ClassSnapshot {
    pub(crate) name: String,
    pub(crate) access: u16,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) fields: Vec<(MemberDesc, u16)>,
    pub(crate) methods: Vec<(MemberDesc, u16)>,
}

impl ClassSnapshot {
    fn from_node(class: &ClassNode) -> Self {
        Self {
            name: class.name.clone(),
            access: class.access,
            super_name: class.super_name.clone(),
            interfaces: class.interfaces.clone(),
            fields: class
                .fields
                .iter()
                .map(|field| (field.member_desc(), field.access))
                .collect(),
            methods: class
                .methods
                .iter()
                .map(|method| (method.member_desc(), method.access))
                .collect(),
        }
    }
}

/// Class metadata tagged with where the class came from.
#[derive(Clone, Debug)]
pub(crate) enum ClassMetadata {
    /// Owned, mutable, renamable.
    Library(ClassSnapshot),
    /// Read-only dependency library.
    Dependency(ClassSnapshot),
    /// Host runtime class.
    Runtime(ClassSnapshot),
}

impl PartialEq for ClassMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for ClassMetadata {}

impl ClassMetadata {
    fn snapshot(&self) -> &ClassSnapshot {
        match self {
            ClassMetadata::Library(snapshot)
            | ClassMetadata::Dependency(snapshot)
            | ClassMetadata::Runtime(snapshot) => snapshot,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.snapshot().name
    }

    /// True for classes this run may not rename or modify.
    pub(crate) fn is_dependency(&self) -> bool {
        !matches!(self, ClassMetadata::Library(_))
    }

    pub(crate) fn is_interface(&self) -> bool {
        self.snapshot().access & ACC_INTERFACE != 0
    }

    pub(crate) fn super_name(&self) -> Option<&str> {
        self.snapshot().super_name.as_deref()
    }

    pub(crate) fn interface_names(&self) -> &[String] {
        &self.snapshot().interfaces
    }

    pub(crate) fn fields(&self) -> impl Iterator<Item = &MemberDesc> {
        self.snapshot().fields.iter().map(|(desc, _)| desc)
    }

    pub(crate) fn methods(&self) -> impl Iterator<Item = &MemberDesc> {
        self.snapshot().methods.iter().map(|(desc, _)| desc)
    }

    pub(crate) fn field_access(&self, field: &MemberDesc) -> Option<u16> {
        self.snapshot()
            .fields
            .iter()
            .find(|(desc, _)| desc == field)
            .map(|(_, access)| *access)
    }

    pub(crate) fn method_access(&self, method: &MemberDesc) -> Option<u16> {
        self.snapshot()
            .methods
            .iter()
            .find(|(desc, _)| desc == method)
            .map(|(_, access)| *access)
    }

    pub(crate) fn super_class(&self, classpath: &ClassPath) -> Option<Rc<ClassMetadata>> {
        self.super_name().and_then(|name| classpath.resolve(name))
    }

    pub(crate) fn super_interfaces(&self, classpath: &ClassPath) -> Vec<Rc<ClassMetadata>> {
        self.interface_names()
            .iter()
            .filter_map(|name| classpath.resolve(name))
            .collect()
    }

    /// Resolved super class followed by resolved super interfaces.
    pub(crate) fn super_class_and_interfaces(
        &self,
        classpath: &ClassPath,
    ) -> Vec<Rc<ClassMetadata>> {
        let mut supers = Vec::new();
        supers.extend(self.super_class(classpath));
        supers.extend(self.super_interfaces(classpath));
        supers
    }

    /// True if a value of class `other` can be stored in a variable of this class.
    pub(crate) fn is_assignable_from(&self, classpath: &ClassPath, other: &ClassMetadata) -> bool {
        if self == other {
            return true;
        }
        let mut visited = HashSet::new();
        let mut pending = other.super_class_and_interfaces(classpath);
        while let Some(ancestor) = pending.pop() {
            if ancestor.name() == self.name() {
                return true;
            }
            if visited.insert(ancestor.name().to_string()) {
                pending.extend(ancestor.super_class_and_interfaces(classpath));
            }
        }
        false
    }

    /// Name of the class declaring `field` as seen from this class: self, then super interfaces, then
    /// the super class chain.
    pub(crate) fn resolve_field(&self, classpath: &ClassPath, field: &MemberDesc) -> Option<String> {
        let mut visited = HashSet::new();
        self.resolve_field_inner(classpath, field, &mut visited)
    }

    fn resolve_field_inner(
        &self,
        classpath: &ClassPath,
        field: &MemberDesc,
        visited: &mut HashSet<String>,
    ) -> Option<String> {
        if !visited.insert(self.name().to_string()) {
            return None;
        }
        if self.field_access(field).is_some() {
            return Some(self.name().to_string());
        }
        for interface in self.super_interfaces(classpath) {
            if let Some(owner) = interface.resolve_field_inner(classpath, field, visited) {
                return Some(owner);
            }
        }
        self.super_class(classpath)
            .and_then(|parent| parent.resolve_field_inner(classpath, field, visited))
    }

    /// Name of the class declaring `method`: self, then the super class chain, then super interfaces.
    pub(crate) fn resolve_method(
        &self,
        classpath: &ClassPath,
        method: &MemberDesc,
    ) -> Option<String> {
        let mut visited = HashSet::new();
        let mut current = Some(Rc::new(self.clone()));
        while let Some(class) = current {
            if !visited.insert(class.name().to_string()) {
                break;
            }
            if class.method_access(method).is_some() {
                return Some(class.name().to_string());
            }
            current = class.super_class(classpath);
        }
        let mut pending = vec![Rc::new(self.clone())];
        let mut seen = HashSet::new();
        while let Some(class) = pending.pop() {
            for ancestor in class.super_class_and_interfaces(classpath) {
                if !seen.insert(ancestor.name().to_string()) {
                    continue;
                }
                if ancestor.is_interface() && ancestor.method_access(method).is_some() {
                    return Some(ancestor.name().to_string());
                }
                pending.push(ancestor);
            }
        }
        None
    }
}

/// Host runtime lookup: an optional platform library plus a built-in `java/lang/Object`.
#[derive(Debug, Default)]
pub(crate) struct Runtime {
    library: Option<Library>,
}

impl Runtime {
    pub(crate) fn new(library: Option<Library>) -> Self {
        Self { library }
    }

    fn lookup(&self, name: &str) -> Option<ClassSnapshot> {
        if let Some(class) = self.library.as_ref().and_then(|library| library.get(name)) {
            return Some(ClassSnapshot::from_node(class));
        }
        (name == "java/lang/Object").then(object_snapshot)
    }
}

fn object_snapshot() -> ClassSnapshot {
    let public = ACC_PUBLIC;
    let public_final_native = ACC_PUBLIC | ACC_FINAL | ACC_NATIVE;
    let methods = [
        ("<init>", "()V", public),
        ("getClass", "()Ljava/lang/Class;", public_final_native),
        ("hashCode", "()I", ACC_PUBLIC | ACC_NATIVE),
        ("equals", "(Ljava/lang/Object;)Z", public),
        ("clone", "()Ljava/lang/Object;", ACC_PROTECTED | ACC_NATIVE),
        ("toString", "()Ljava/lang/String;", public),
        ("notify", "()V", public_final_native),
        ("notifyAll", "()V", public_final_native),
        ("wait", "()V", ACC_PUBLIC | ACC_FINAL),
        ("wait", "(J)V", public_final_native),
        ("wait", "(JI)V", ACC_PUBLIC | ACC_FINAL),
        ("finalize", "()V", ACC_PROTECTED),
        ("<clinit>", "()V", ACC_STATIC),
    ];
    ClassSnapshot {
        name: "java/lang/Object".to_string(),
        access: ACC_PUBLIC,
        super_name: None,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods: methods
            .iter()
            .map(|(name, desc, access)| (MemberDesc::new(*name, *desc), *access))
            .collect(),
    }
}

/// Kind of an owned member.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum MemberKind {
    Field,
    Method,
}

/// Own libraries, read-only dependencies and the host runtime, with a memoized resolver.
///
/// Every operation that hands out mutable access to an owned class clears the resolution cache
/// before returning.
#[derive(Debug)]
pub(crate) struct ClassPath {
    libraries: Vec<Library>,
    dependencies: Vec<Library>,
    runtime: Runtime,
    cache: RefCell<HashMap<String, Option<Rc<ClassMetadata>>>>,
}

impl ClassPath {
    pub(crate) fn new(libraries: Vec<Library>, dependencies: Vec<Library>, runtime: Runtime) -> Self {
        Self {
            libraries,
            dependencies,
            runtime,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Looks `name` up in own libraries, then dependencies, then the host runtime.
    pub(crate) fn resolve(&self, name: &str) -> Option<Rc<ClassMetadata>> {
        if let Some(cached) = self.cache.borrow().get(name) {
            return cached.clone();
        }
        let resolved = self.resolve_uncached(name).map(Rc::new);
        self.cache
            .borrow_mut()
            .insert(name.to_string(), resolved.clone());
        resolved
    }

    fn resolve_uncached(&self, name: &str) -> Option<ClassMetadata> {
        if let Some(class) = self.libraries.iter().find_map(|library| library.get(name)) {
            return Some(ClassMetadata::Library(ClassSnapshot::from_node(class)));
        }
        if let Some(class) = self.dependencies.iter().find_map(|library| library.get(name)) {
            return Some(ClassMetadata::Dependency(ClassSnapshot::from_node(class)));
        }
        self.runtime.lookup(name).map(ClassMetadata::Runtime)
    }

    pub(crate) fn invalidate(&self) {
        self.cache.borrow_mut().clear();
    }

    /// Owned class definition; dependencies are never returned.
    pub(crate) fn class_node(&self, name: &str) -> Option<&ClassNode> {
        self.libraries.iter().find_map(|library| library.get(name))
    }

    pub(crate) fn class_node_mut(&mut self, name: &str) -> Option<&mut ClassNode> {
        self.invalidate();
        self.libraries
            .iter_mut()
            .find_map(|library| library.get_mut(name))
    }

    pub(crate) fn libraries(&self) -> &[Library] {
        &self.libraries
    }

    pub(crate) fn own_classes(&self) -> impl Iterator<Item = &ClassNode> {
        self.libraries.iter().flat_map(Library::iter)
    }

    /// Lazily yields every field and method declared by an owned class.
    pub(crate) fn all_own_members(&self) -> impl Iterator<Item = (MemberKind, MemberRef)> + '_ {
        self.own_classes().flat_map(|class| {
            let fields = class.fields.iter().map(move |field| {
                (MemberKind::Field, MemberRef::new(class.name.clone(), &field.member_desc()))
            });
            let methods = class.methods.iter().map(move |method| {
                (MemberKind::Method, MemberRef::new(class.name.clone(), &method.member_desc()))
            });
            fields.chain(methods)
        })
    }

    /// Rewrites every reference inside every owned class, then clears the resolution cache.
    pub(crate) fn apply_renaming(&mut self, remapper: &dyn Remapper) -> Result<()> {
        self.invalidate();
        for library in &mut self.libraries {
            library.remap(remapper)?;
        }
        self.invalidate();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{class, field, method, classpath_of};

    #[test]
    fn resolve_prefers_own_libraries_then_dependencies_then_runtime() {
        let mut own = Library::new("client");
        own.add(class("Shared", Some("java/lang/Object")));
        let mut dependency = Library::new("dep");
        dependency.add(class("Shared", Some("java/lang/Object")));
        dependency.add(class("Api", Some("java/lang/Object")));
        let classpath = ClassPath::new(vec![own], vec![dependency], Runtime::default());

        let shared = classpath.resolve("Shared").expect("resolve own");
        let api = classpath.resolve("Api").expect("resolve dependency");
        let object = classpath.resolve("java/lang/Object").expect("resolve runtime");

        assert!(!shared.is_dependency());
        assert!(api.is_dependency());
        assert!(matches!(*object, ClassMetadata::Runtime(_)));
        assert!(classpath.resolve("missing/Type").is_none());
    }

    #[test]
    fn mutation_invalidates_cached_metadata() {
        let mut classpath = classpath_of(vec![class("A", Some("java/lang/Object"))]);
        let before = classpath.resolve("A").expect("resolve");
        assert_eq!(before.methods().count(), 0);

        classpath
            .class_node_mut("A")
            .expect("class")
            .methods
            .push(method("run", "()V", ACC_PUBLIC, None));

        let after = classpath.resolve("A").expect("resolve");
        assert_eq!(after.methods().count(), 1);
    }

    #[test]
    fn resolve_field_searches_interfaces_before_super_class() {
        let mut parent = class("P", Some("java/lang/Object"));
        parent.fields.push(field("x", "I", 0));
        let mut interface = class("I", Some("java/lang/Object"));
        interface.access |= ACC_INTERFACE;
        interface.fields.push(field("x", "I", ACC_STATIC));
        let mut child = class("C", Some("P"));
        child.interfaces.push("I".to_string());
        let classpath = classpath_of(vec![parent, interface, child]);

        let metadata = classpath.resolve("C").expect("resolve");
        let owner = metadata.resolve_field(&classpath, &MemberDesc::new("x", "I"));

        assert_eq!(owner.as_deref(), Some("I"));
    }

    #[test]
    fn resolve_method_walks_super_chain_and_runtime() {
        let parent = class("P", Some("java/lang/Object"));
        let child = class("C", Some("P"));
        let classpath = classpath_of(vec![parent, child]);

        let metadata = classpath.resolve("C").expect("resolve");
        let owner =
            metadata.resolve_method(&classpath, &MemberDesc::new("toString", "()Ljava/lang/String;"));

        assert_eq!(owner.as_deref(), Some("java/lang/Object"));
        let object = classpath.resolve("java/lang/Object").expect("object");
        assert!(object.is_assignable_from(&classpath, &metadata));
        assert!(!metadata.is_assignable_from(&classpath, &object));
    }

    #[test]
    fn all_own_members_lists_fields_then_methods_per_class() {
        let mut a = class("A", Some("java/lang/Object"));
        a.fields.push(field("f", "I", 0));
        a.methods.push(method("m", "()V", 0, None));
        let classpath = classpath_of(vec![a]);

        let members: Vec<_> = classpath.all_own_members().collect();

        assert_eq!(
            members,
            vec![
                (MemberKind::Field, "A.f I".parse().expect("member")),
                (MemberKind::Method, "A.m ()V".parse().expect("member")),
            ]
        );
    }
}
