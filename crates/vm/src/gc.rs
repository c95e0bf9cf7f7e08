//! Mark-and-sweep garbage collector over the slab pools.
//!
//! The collector owns every runtime value: one [`SlabAllocator`] per type
//! plus the three singletons. Collection is non-moving, precise and
//! stop-the-world; the mark phase walks an explicit work queue, the sweep
//! frees every unmarked cell and re-sorts the slabs.

use crate::big_int::MslInt;
use crate::config::GcConfig;
use crate::frame::Frame;
use crate::object::*;
use crate::slab::SlabAllocator;
use crate::types::{Assembly, AttributeModifiers, ClassId, NamespaceId};
use std::io::Write;
use std::time::Instant;

/// Renders a byte count in the GC report style.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        let amount = bytes * 100 / GB;
        format!("{}.{:02} GB", amount / 100, amount % 100)
    } else if bytes >= MB {
        let amount = bytes * 100 / MB;
        format!("{}.{:02} MB", amount / 100, amount % 100)
    } else if bytes >= KB {
        let amount = bytes * 100 / KB;
        format!("{}.{:02} KB", amount / 100, amount % 100)
    } else {
        format!("{bytes} bytes")
    }
}

/// Statistics of the most recent collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub cleared_objects: u64,
    pub cleared_bytes: u64,
    pub managed_objects: u64,
    pub iterations: u64,
}

pub struct GarbageCollector {
    integers: SlabAllocator<IntegerObject>,
    floats: SlabAllocator<FloatObject>,
    strings: SlabAllocator<StringObject>,
    arrays: SlabAllocator<ArrayObject>,
    class_objects: SlabAllocator<ClassObject>,
    class_wrappers: SlabAllocator<ClassWrapper>,
    namespace_wrappers: SlabAllocator<NamespaceWrapper>,
    attributes: SlabAllocator<AttributeObject>,
    locals: SlabAllocator<LocalObject>,
    unknowns: SlabAllocator<UnknownObject>,

    min_memory: u64,
    max_memory: u64,
    allow_collect: bool,
    high_water: u64,
    log: Option<Box<dyn Write>>,
    log_to_error: bool,

    stats: GcStats,
    last_iteration: Instant,
}

impl GarbageCollector {
    pub fn new(config: GcConfig) -> Self {
        let capacity = config.init_capacity.max(1);
        Self {
            integers: SlabAllocator::new(capacity),
            floats: SlabAllocator::new(capacity),
            strings: SlabAllocator::new(capacity),
            arrays: SlabAllocator::new(capacity),
            class_objects: SlabAllocator::new(capacity),
            class_wrappers: SlabAllocator::new(capacity),
            namespace_wrappers: SlabAllocator::new(capacity),
            attributes: SlabAllocator::new(capacity),
            locals: SlabAllocator::new(capacity),
            unknowns: SlabAllocator::new(capacity),
            min_memory: config.min_memory,
            max_memory: config.max_memory,
            high_water: config.min_memory,
            allow_collect: config.allow_collect,
            log: config.log,
            log_to_error: false,
            stats: GcStats::default(),
            last_iteration: Instant::now(),
        }
    }

    // ----- allocation ---------------------------------------------------

    pub fn alloc_integer(&mut self, value: MslInt) -> ObjectRef {
        let object = IntegerObject::new(value);
        let bytes = object.byte_size();
        ObjectRef::new(TypeTag::Integer, self.integers.alloc(object, bytes))
    }

    pub fn alloc_integer_from_str(&mut self, text: &str) -> ObjectRef {
        self.alloc_integer(MslInt::parse(text))
    }

    pub fn alloc_float(&mut self, value: f64) -> ObjectRef {
        ObjectRef::new(TypeTag::Float, self.floats.alloc(FloatObject::new(value), 0))
    }

    pub fn alloc_float_from_str(&mut self, text: &str) -> ObjectRef {
        self.alloc_float(text.trim().parse::<f64>().unwrap_or(0.0))
    }

    pub fn alloc_string(&mut self, value: impl Into<String>) -> ObjectRef {
        let object = StringObject::new(value.into());
        let bytes = object.byte_size();
        ObjectRef::new(TypeTag::String, self.strings.alloc(object, bytes))
    }

    pub fn alloc_array(&mut self, size: usize) -> ObjectRef {
        let object = ArrayObject::new(size);
        let bytes = object.byte_size();
        ObjectRef::new(TypeTag::Array, self.arrays.alloc(object, bytes))
    }

    pub fn alloc_unknown(&mut self, name: impl Into<String>) -> ObjectRef {
        let object = UnknownObject::new(name.into());
        let bytes = object.byte_size();
        ObjectRef::new(TypeTag::Unknown, self.unknowns.alloc(object, bytes))
    }

    pub fn alloc_local(&mut self, name: impl Into<String>, slot: LocalSlot) -> ObjectRef {
        let object = LocalObject::new(name.into(), slot);
        let bytes = object.byte_size();
        ObjectRef::new(TypeTag::Local, self.locals.alloc(object, bytes))
    }

    pub fn alloc_attribute(
        &mut self,
        name: impl Into<String>,
        modifiers: AttributeModifiers,
    ) -> ObjectRef {
        let object = AttributeObject::new(name.into(), modifiers);
        let bytes = object.byte_size();
        ObjectRef::new(TypeTag::Attribute, self.attributes.alloc(object, bytes))
    }

    pub fn alloc_class_wrapper(&mut self, class: ClassId) -> ObjectRef {
        ObjectRef::new(
            TypeTag::Class,
            self.class_wrappers.alloc(ClassWrapper::new(class), 0),
        )
    }

    pub fn alloc_namespace_wrapper(&mut self, namespace: NamespaceId) -> ObjectRef {
        ObjectRef::new(
            TypeTag::Namespace,
            self.namespace_wrappers.alloc(NamespaceWrapper::new(namespace), 0),
        )
    }

    /// Allocates an instance of `class` with one attribute object per
    /// declared object attribute, each initialized to Null.
    pub fn alloc_class_object(&mut self, class: ClassId, assembly: &Assembly) -> ObjectRef {
        let attribute_types: Vec<(String, AttributeModifiers)> = assembly
            .class(class)
            .object_attributes
            .values()
            .map(|attr| (attr.name.clone(), attr.modifiers))
            .collect();
        self.alloc_instance(class, attribute_types)
    }

    /// Allocates the singleton static-state instance of `class`.
    pub fn alloc_static_instance(&mut self, class: ClassId, assembly: &Assembly) -> ObjectRef {
        let attribute_types: Vec<(String, AttributeModifiers)> = assembly
            .class(class)
            .static_attributes
            .values()
            .map(|attr| (attr.name.clone(), attr.modifiers))
            .collect();
        self.alloc_instance(class, attribute_types)
    }

    fn alloc_instance(
        &mut self,
        class: ClassId,
        attribute_types: Vec<(String, AttributeModifiers)>,
    ) -> ObjectRef {
        let mut object = ClassObject::new(class);
        for (name, modifiers) in attribute_types {
            let attribute = self.alloc_attribute(name.clone(), modifiers);
            object.attributes.insert(name, attribute);
        }
        let bytes = object.byte_size();
        ObjectRef::new(TypeTag::ClassObject, self.class_objects.alloc(object, bytes))
    }

    // ----- typed access -------------------------------------------------

    pub fn integer(&self, r: ObjectRef) -> Option<&IntegerObject> {
        (r.tag == TypeTag::Integer).then(|| self.integers.get(r.index)).flatten()
    }

    pub fn integer_mut(&mut self, r: ObjectRef) -> Option<&mut IntegerObject> {
        (r.tag == TypeTag::Integer)
            .then(|| self.integers.get_mut(r.index))
            .flatten()
    }

    pub fn float(&self, r: ObjectRef) -> Option<&FloatObject> {
        (r.tag == TypeTag::Float).then(|| self.floats.get(r.index)).flatten()
    }

    pub fn float_mut(&mut self, r: ObjectRef) -> Option<&mut FloatObject> {
        (r.tag == TypeTag::Float).then(|| self.floats.get_mut(r.index)).flatten()
    }

    pub fn string(&self, r: ObjectRef) -> Option<&StringObject> {
        (r.tag == TypeTag::String).then(|| self.strings.get(r.index)).flatten()
    }

    pub fn string_mut(&mut self, r: ObjectRef) -> Option<&mut StringObject> {
        (r.tag == TypeTag::String).then(|| self.strings.get_mut(r.index)).flatten()
    }

    pub fn array(&self, r: ObjectRef) -> Option<&ArrayObject> {
        (r.tag == TypeTag::Array).then(|| self.arrays.get(r.index)).flatten()
    }

    pub fn array_mut(&mut self, r: ObjectRef) -> Option<&mut ArrayObject> {
        (r.tag == TypeTag::Array).then(|| self.arrays.get_mut(r.index)).flatten()
    }

    pub fn class_object(&self, r: ObjectRef) -> Option<&ClassObject> {
        (r.tag == TypeTag::ClassObject)
            .then(|| self.class_objects.get(r.index))
            .flatten()
    }

    pub fn class_object_mut(&mut self, r: ObjectRef) -> Option<&mut ClassObject> {
        (r.tag == TypeTag::ClassObject)
            .then(|| self.class_objects.get_mut(r.index))
            .flatten()
    }

    pub fn class_wrapper(&self, r: ObjectRef) -> Option<&ClassWrapper> {
        (r.tag == TypeTag::Class)
            .then(|| self.class_wrappers.get(r.index))
            .flatten()
    }

    pub fn namespace_wrapper(&self, r: ObjectRef) -> Option<&NamespaceWrapper> {
        (r.tag == TypeTag::Namespace)
            .then(|| self.namespace_wrappers.get(r.index))
            .flatten()
    }

    pub fn attribute(&self, r: ObjectRef) -> Option<&AttributeObject> {
        (r.tag == TypeTag::Attribute)
            .then(|| self.attributes.get(r.index))
            .flatten()
    }

    pub fn attribute_mut(&mut self, r: ObjectRef) -> Option<&mut AttributeObject> {
        (r.tag == TypeTag::Attribute)
            .then(|| self.attributes.get_mut(r.index))
            .flatten()
    }

    pub fn local(&self, r: ObjectRef) -> Option<&LocalObject> {
        (r.tag == TypeTag::Local).then(|| self.locals.get(r.index)).flatten()
    }

    pub fn unknown(&self, r: ObjectRef) -> Option<&UnknownObject> {
        (r.tag == TypeTag::Unknown).then(|| self.unknowns.get(r.index)).flatten()
    }

    // ----- policy -------------------------------------------------------

    pub fn allow_collect(&self) -> bool {
        self.allow_collect
    }

    pub fn set_allow_collect(&mut self, allow: bool) {
        self.allow_collect = allow;
    }

    pub fn set_min_memory(&mut self, bytes: u64) {
        self.min_memory = bytes;
        self.high_water = self.high_water.max(bytes);
    }

    pub fn set_max_memory(&mut self, bytes: u64) {
        self.max_memory = bytes;
    }

    /// True routes the GC report to the VM error stream, false back to the
    /// configured log stream.
    pub fn set_log_to_error(&mut self, to_error: bool) {
        self.log_to_error = to_error;
    }

    /// Total managed bytes: slab storage plus reported per-object bytes.
    pub fn total_allocated_bytes(&self) -> u64 {
        self.integers.total_bytes()
            + self.floats.total_bytes()
            + self.strings.total_bytes()
            + self.arrays.total_bytes()
            + self.class_objects.total_bytes()
            + self.class_wrappers.total_bytes()
            + self.namespace_wrappers.total_bytes()
            + self.attributes.total_bytes()
            + self.locals.total_bytes()
            + self.unknowns.total_bytes()
    }

    /// Total live objects across every pool.
    pub fn total_alloc_count(&self) -> u64 {
        self.integers.alloc_count
            + self.floats.alloc_count
            + self.strings.alloc_count
            + self.arrays.alloc_count
            + self.class_objects.alloc_count
            + self.class_wrappers.alloc_count
            + self.namespace_wrappers.alloc_count
            + self.attributes.alloc_count
            + self.locals.alloc_count
            + self.unknowns.alloc_count
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    pub fn time_since_last_iteration(&self) -> std::time::Duration {
        self.last_iteration.elapsed()
    }

    /// Consults the allocation-pressure policy and collects when the managed
    /// byte total crossed the high-water mark. Returns true when the heap is
    /// still above the configured maximum afterwards.
    pub fn maybe_collect(
        &mut self,
        assembly: &Assembly,
        frames: &[Frame],
        stack: &[ObjectRef],
        error_stream: Option<&mut dyn Write>,
    ) -> bool {
        if !self.allow_collect {
            return false;
        }
        if self.total_allocated_bytes() < self.high_water {
            return false;
        }
        self.collect(assembly, frames, stack, error_stream);
        let live = self.total_allocated_bytes();
        let ceiling = self.max_memory.max(self.min_memory);
        self.high_water = live.saturating_mul(2).clamp(self.min_memory, ceiling);
        live >= self.max_memory
    }

    /// Runs a full mark-and-sweep cycle over the given roots.
    pub fn collect(
        &mut self,
        assembly: &Assembly,
        frames: &[Frame],
        stack: &[ObjectRef],
        error_stream: Option<&mut dyn Write>,
    ) {
        let start = Instant::now();
        self.stats.iterations += 1;

        self.mark_roots(assembly, frames, stack);

        let mut cleared_objects = 0u64;
        let mut cleared_bytes = 0u64;
        let mut managed_objects = 0u64;
        self.sweep(&mut cleared_objects, &mut cleared_bytes, &mut managed_objects);

        self.stats.cleared_objects = cleared_objects;
        self.stats.cleared_bytes = cleared_bytes;
        self.stats.managed_objects = managed_objects;
        self.last_iteration = Instant::now();

        let elapsed_ms = start.elapsed().as_millis();
        let total = self.total_allocated_bytes();
        log::debug!(
            "gc iteration #{}: cleared {} objects ({}), managing {} objects ({}) in {} ms",
            self.stats.iterations,
            cleared_objects,
            format_bytes(cleared_bytes),
            managed_objects,
            format_bytes(total),
            elapsed_ms
        );

        let report = format!(
            "\n------------------------------------------\n\
             [GC]: finished iteration #{}\n\
             [GC]: full garbage collection done in {} ms\n\
             [GC]: collected total of {} objects\n\
             [GC]: still managing {} objects\n\
             [GC]: cleared memory: {}\n\
             [GC]: managed memory: {}\n\
             ------------------------------------------\n",
            self.stats.iterations,
            elapsed_ms,
            cleared_objects,
            managed_objects,
            format_bytes(cleared_bytes),
            format_bytes(total),
        );
        if self.log_to_error {
            if let Some(stream) = error_stream {
                let _ = stream.write_all(report.as_bytes());
            }
        } else if let Some(log) = self.log.as_mut() {
            let _ = log.write_all(report.as_bytes());
        }
    }

    fn mark_roots(&mut self, assembly: &Assembly, frames: &[Frame], stack: &[ObjectRef]) {
        let mut queue: Vec<ObjectRef> = Vec::new();

        for namespace in &assembly.namespaces {
            if let Some(wrapper) = namespace.wrapper {
                queue.push(wrapper);
            }
        }
        for frame in frames {
            queue.push(frame.this_ref);
            for local in frame.locals.values() {
                queue.push(local.value);
            }
        }
        queue.extend_from_slice(stack);

        while let Some(r) = queue.pop() {
            self.mark_one(r, assembly, frames, &mut queue);
        }
    }

    fn mark_one(
        &mut self,
        r: ObjectRef,
        assembly: &Assembly,
        frames: &[Frame],
        queue: &mut Vec<ObjectRef>,
    ) {
        match r.tag {
            // Singletons are never collected.
            TypeTag::Null | TypeTag::True | TypeTag::False | TypeTag::Base => {}
            TypeTag::Integer => {
                if let Some(object) = self.integers.get_mut(r.index) {
                    object.state = GcState::Marked;
                }
            }
            TypeTag::Float => {
                if let Some(object) = self.floats.get_mut(r.index) {
                    object.state = GcState::Marked;
                }
            }
            TypeTag::String => {
                if let Some(object) = self.strings.get_mut(r.index) {
                    object.state = GcState::Marked;
                }
            }
            TypeTag::Unknown => {
                if let Some(object) = self.unknowns.get_mut(r.index) {
                    object.state = GcState::Marked;
                }
            }
            TypeTag::Array => {
                if let Some(object) = self.arrays.get_mut(r.index) {
                    if object.state != GcState::Marked {
                        object.state = GcState::Marked;
                        for element in &object.elements {
                            queue.push(element.value);
                        }
                    }
                }
            }
            TypeTag::ClassObject => {
                if let Some(object) = self.class_objects.get_mut(r.index) {
                    if object.state != GcState::Marked {
                        object.state = GcState::Marked;
                        for attribute in object.attributes.values() {
                            queue.push(*attribute);
                        }
                    }
                }
            }
            TypeTag::Class => {
                let class = match self.class_wrappers.get_mut(r.index) {
                    Some(object) if object.state != GcState::Marked => {
                        object.state = GcState::Marked;
                        Some(object.class)
                    }
                    _ => None,
                };
                if let Some(class) = class {
                    if let Some(instance) = assembly.class(class).static_instance {
                        queue.push(instance);
                    }
                }
            }
            TypeTag::Namespace => {
                let namespace = match self.namespace_wrappers.get_mut(r.index) {
                    Some(object) if object.state != GcState::Marked => {
                        object.state = GcState::Marked;
                        Some(object.namespace)
                    }
                    _ => None,
                };
                if let Some(namespace) = namespace {
                    for class in assembly.namespace(namespace).classes.values() {
                        if let Some(wrapper) = assembly.class(*class).wrapper {
                            queue.push(wrapper);
                        }
                    }
                }
            }
            TypeTag::Attribute => {
                if let Some(object) = self.attributes.get_mut(r.index) {
                    if object.state != GcState::Marked {
                        object.state = GcState::Marked;
                        queue.push(object.value);
                    }
                }
            }
            TypeTag::Local => {
                let slot = match self.locals.get_mut(r.index) {
                    Some(object) if object.state != GcState::Marked => {
                        object.state = GcState::Marked;
                        Some((object.slot.clone(), object.name.clone()))
                    }
                    _ => None,
                };
                match slot {
                    Some((LocalSlot::Frame { frame }, name)) => {
                        if let Some(frame) = frames.iter().find(|f| f.id == frame) {
                            if let Some(local) = frame.locals.get(&name) {
                                queue.push(local.value);
                            }
                        }
                    }
                    Some((LocalSlot::ArrayElem { array, .. }, _)) => {
                        queue.push(array);
                    }
                    None => {}
                }
            }
        }
    }

    fn sweep(&mut self, cleared_objects: &mut u64, cleared_bytes: &mut u64, managed: &mut u64) {
        sweep_allocator(&mut self.integers, cleared_objects, cleared_bytes, managed);
        sweep_allocator(&mut self.floats, cleared_objects, cleared_bytes, managed);
        sweep_allocator(&mut self.strings, cleared_objects, cleared_bytes, managed);
        sweep_allocator(&mut self.arrays, cleared_objects, cleared_bytes, managed);
        sweep_allocator(&mut self.class_objects, cleared_objects, cleared_bytes, managed);
        sweep_allocator(&mut self.class_wrappers, cleared_objects, cleared_bytes, managed);
        sweep_allocator(&mut self.namespace_wrappers, cleared_objects, cleared_bytes, managed);
        sweep_allocator(&mut self.attributes, cleared_objects, cleared_bytes, managed);
        sweep_allocator(&mut self.locals, cleared_objects, cleared_bytes, managed);
        sweep_allocator(&mut self.unknowns, cleared_objects, cleared_bytes, managed);
    }

    /// Returns free-slab memory to the host on every pool.
    pub fn release_memory(&mut self) {
        self.integers.release_free_slabs();
        self.floats.release_free_slabs();
        self.strings.release_free_slabs();
        self.arrays.release_free_slabs();
        self.class_objects.release_free_slabs();
        self.class_wrappers.release_free_slabs();
        self.namespace_wrappers.release_free_slabs();
        self.attributes.release_free_slabs();
        self.locals.release_free_slabs();
        self.unknowns.release_free_slabs();
    }

    // ----- rendering ----------------------------------------------------

    /// Human-readable value text used by Print and diagnostics.
    pub fn to_text(&self, r: ObjectRef, assembly: &Assembly) -> String {
        match r.tag {
            TypeTag::Null => "null".to_string(),
            TypeTag::True => "true".to_string(),
            TypeTag::False => "false".to_string(),
            TypeTag::Base => "ERROR".to_string(),
            TypeTag::Integer => match self.integer(r) {
                Some(object) => object.value.to_string(),
                None => "<collected>".to_string(),
            },
            TypeTag::Float => match self.float(r) {
                Some(object) => object.to_text(),
                None => "<collected>".to_string(),
            },
            TypeTag::String => match self.string(r) {
                Some(object) => object.value.clone(),
                None => "<collected>".to_string(),
            },
            TypeTag::Array => "Array".to_string(),
            TypeTag::ClassObject => match self.class_object(r) {
                Some(object) => assembly.full_class_name(object.class),
                None => "<collected>".to_string(),
            },
            TypeTag::Class => match self.class_wrapper(r) {
                Some(object) => assembly.full_class_name(object.class),
                None => "<collected>".to_string(),
            },
            TypeTag::Namespace => match self.namespace_wrapper(r) {
                Some(object) => assembly.namespace(object.namespace).name.clone(),
                None => "<collected>".to_string(),
            },
            TypeTag::Attribute => match self.attribute(r) {
                Some(object) => {
                    let mut out = String::new();
                    if object.is_public() {
                        out.push_str("public ");
                    }
                    if object.is_static() {
                        out.push_str("static ");
                    }
                    if object.is_const() {
                        out.push_str("const ");
                    }
                    out.push_str(&object.name);
                    out.push_str(" attribute");
                    out
                }
                None => "<collected>".to_string(),
            },
            TypeTag::Local => match self.local(r) {
                Some(object) => object.name.clone(),
                None => "<collected>".to_string(),
            },
            TypeTag::Unknown => match self.unknown(r) {
                Some(object) => object.name.clone(),
                None => "<collected>".to_string(),
            },
        }
    }

    /// Secondary description shown in operand-stack dumps.
    pub fn extra_info(&self, r: ObjectRef, assembly: &Assembly) -> String {
        match r.tag {
            TypeTag::Null => String::new(),
            TypeTag::True | TypeTag::False => "Boolean".to_string(),
            TypeTag::Integer => "BigInteger".to_string(),
            TypeTag::Float => "Float".to_string(),
            TypeTag::String => "String".to_string(),
            TypeTag::Base => String::new(),
            TypeTag::Array => match self.array(r) {
                Some(object) => format!("array size: {}", object.elements.len()),
                None => String::new(),
            },
            TypeTag::ClassObject => "class instance".to_string(),
            TypeTag::Class => match self.class_wrapper(r) {
                Some(object) => {
                    let class = assembly.class(object.class);
                    let mut info = String::new();
                    info.push_str(if class.is_internal() { "internal" } else { "public" });
                    if class.is_system() {
                        info.push_str(" system");
                    }
                    if class.is_abstract() {
                        info.push_str(" abstract");
                    }
                    if class.is_const() {
                        info.push_str(" const");
                    }
                    if class.is_interface() {
                        info.push_str(" interface");
                    }
                    if class.is_static() {
                        info.push_str(" static");
                    }
                    info.push_str(" class");
                    info
                }
                None => String::new(),
            },
            TypeTag::Namespace => match self.namespace_wrapper(r) {
                Some(object) => {
                    let mut info = "friends".to_string();
                    for friend in &assembly.namespace(object.namespace).friends {
                        info.push(' ');
                        info.push_str(friend);
                    }
                    info
                }
                None => String::new(),
            },
            TypeTag::Attribute => match self.attribute(r) {
                Some(object) => format!("value: {}", self.to_text(object.value, assembly)),
                None => String::new(),
            },
            TypeTag::Local => match self.local(r) {
                Some(_) => "local variable".to_string(),
                None => String::new(),
            },
            TypeTag::Unknown => "unresolved reference".to_string(),
        }
    }
}

fn sweep_allocator<T: HeapObject>(
    allocator: &mut SlabAllocator<T>,
    cleared_objects: &mut u64,
    cleared_bytes: &mut u64,
    managed: &mut u64,
) {
    let mut doomed: Vec<(u32, usize)> = Vec::new();
    allocator.for_each_occupied(|index, object| match object.state() {
        GcState::Unmarked => doomed.push((index, object.byte_size())),
        GcState::Marked => {
            object.set_state(GcState::Unmarked);
            *managed += 1;
        }
        GcState::Free => {}
    });
    for (index, bytes) in doomed {
        if allocator.free(index, bytes).is_some() {
            *cleared_objects += 1;
            *cleared_bytes += bytes as u64;
        }
    }
    allocator.reallocate_slabs();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassModifiers, ClassType, NamespaceType};

    fn empty_assembly() -> Assembly {
        Assembly::new()
    }

    #[test]
    fn collects_unreachable_values() {
        let mut gc = GarbageCollector::new(GcConfig::default());
        let assembly = empty_assembly();

        let reachable = gc.alloc_integer(MslInt::from(1i64));
        let _garbage_a = gc.alloc_integer(MslInt::from(2i64));
        let _garbage_b = gc.alloc_string("dead");
        assert_eq!(gc.total_alloc_count(), 3);

        gc.collect(&assembly, &[], &[reachable], None);
        assert_eq!(gc.stats().cleared_objects, 2);
        assert_eq!(gc.total_alloc_count(), 1);
        assert!(gc.integer(reachable).is_some());
        // Survivors are left Unmarked for the next cycle.
        assert_eq!(gc.integer(reachable).unwrap().state, GcState::Unmarked);
    }

    #[test]
    fn marks_through_composites() {
        let mut gc = GarbageCollector::new(GcConfig::default());
        let assembly = empty_assembly();

        let element = gc.alloc_string("kept");
        let array = gc.alloc_array(0);
        gc.array_mut(array).unwrap().elements.push(Local::new(element));

        let dead = gc.alloc_string("dropped");
        gc.collect(&assembly, &[], &[array], None);

        assert!(gc.string(element).is_some());
        assert!(gc.array(array).is_some());
        assert!(gc.string(dead).is_none());
    }

    #[test]
    fn marks_through_class_instances_and_wrappers() {
        let mut gc = GarbageCollector::new(GcConfig::default());
        let mut assembly = empty_assembly();
        let ns = assembly.add_namespace(NamespaceType {
            name: "Main".into(),
            ..Default::default()
        });
        let mut class = ClassType::new("Box".into(), ns, ClassModifiers::empty());
        class.object_attributes.insert(
            "value".into(),
            crate::types::AttributeType {
                name: "value".into(),
                modifiers: AttributeModifiers::PUBLIC,
            },
        );
        let class_id = assembly.add_class(class);

        let instance = gc.alloc_class_object(class_id, &assembly);
        let payload = gc.alloc_integer(MslInt::from(99i64));
        let attribute = gc.class_object(instance).unwrap().attributes["value"];
        gc.attribute_mut(attribute).unwrap().value = payload;

        let wrapper = gc.alloc_class_wrapper(class_id);
        let static_instance = gc.alloc_static_instance(class_id, &assembly);
        assembly.class_mut(class_id).wrapper = Some(wrapper);
        assembly.class_mut(class_id).static_instance = Some(static_instance);
        let ns_wrapper = gc.alloc_namespace_wrapper(ns);
        assembly.namespace_mut(ns).wrapper = Some(ns_wrapper);

        // Roots: only the instance on the stack; wrappers via the namespace.
        gc.collect(&assembly, &[], &[instance], None);

        assert!(gc.class_object(instance).is_some());
        assert!(gc.attribute(attribute).is_some());
        assert!(gc.integer(payload).is_some());
        assert!(gc.class_wrapper(wrapper).is_some());
        assert!(gc.class_object(static_instance).is_some());
        assert!(gc.namespace_wrapper(ns_wrapper).is_some());
    }

    #[test]
    fn maybe_collect_honors_allow_flag() {
        let config = GcConfig {
            allow_collect: false,
            min_memory: 0,
            ..Default::default()
        };
        let mut gc = GarbageCollector::new(config);
        let assembly = empty_assembly();
        let _dead = gc.alloc_string("x");
        assert!(!gc.maybe_collect(&assembly, &[], &[], None));
        assert_eq!(gc.stats().iterations, 0);
    }

    #[test]
    fn singletons_survive_collection() {
        let mut gc = GarbageCollector::new(GcConfig::default());
        let assembly = empty_assembly();
        gc.collect(&assembly, &[], &[ObjectRef::NULL, ObjectRef::TRUE], None);
        assert_eq!(gc.to_text(ObjectRef::NULL, &assembly), "null");
        assert_eq!(gc.to_text(ObjectRef::TRUE, &assembly), "true");
    }
}
