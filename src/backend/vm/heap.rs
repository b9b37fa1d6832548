// wisp heap
// Changelog:
//      Initial version: string interning, polymorphic allocation for every
//      object kind, and GC threshold bookkeeping in the style of the
//      original register-machine Heap (total_allocated/threshold,
//      check_gc_condition/expand_threshold) — rebased onto the
//      class/closure/upvalue-bearing object model of a stack VM.

use crate::common::hash::fnv1a32;
use crate::common::object::{
    BoundMethodRef, ClassRef, ClosureRef, FunctionRef, GCObject, HeaderOnly, InstanceRef, NativeFn,
    NativeRef, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjInstance, ObjKind, ObjNative,
    ObjString, ObjUpvalue, StrRef, UpvalueRef,
};
use crate::common::value::Value;
use std::collections::HashMap;

const INITIAL_GC_THRESHOLD: usize = 1024 * 1024; // 1 MiB, matches the teacher's VM_THRESHOLD

pub struct Heap {
    objects: *mut GCObject<HeaderOnly>,
    strings: HashMap<String, StrRef>,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    pub max_allocated: usize,
    /// Scratch rooting stack: anything pushed here survives a collection
    /// that happens before it is wired into a real root (a constant pool,
    /// a stack slot, a global). Mirrors spec's "push onto the value stack
    /// before appending, pop after" rule for `Chunk::add_constant` and for
    /// `concatenate`, without requiring a running VM during compilation.
    pub roots: Vec<Value>,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            objects: std::ptr::null_mut(),
            strings: HashMap::new(),
            bytes_allocated: 0,
            next_gc: INITIAL_GC_THRESHOLD,
            max_allocated: 0,
            roots: Vec::new(),
        }
    }

    pub fn objects_head(&self) -> *mut GCObject<HeaderOnly> {
        self.objects
    }

    pub fn push_root(&mut self, value: Value) {
        self.roots.push(value);
    }

    pub fn pop_root(&mut self) {
        self.roots.pop();
    }

    pub fn intern_string(&mut self, s: &str) -> StrRef {
        if let Some(&ptr) = self.strings.get(s) {
            return ptr;
        }
        let hash = fnv1a32(s.as_bytes());
        let size = std::mem::size_of::<GCObject<ObjString>>() + s.len();
        let data = ObjString { hash, chars: s.to_string() };
        let ptr = self.alloc_raw(data, ObjKind::String, size);
        self.strings.insert(s.to_string(), ptr);
        ptr
    }

    pub fn alloc_function(&mut self, data: ObjFunction) -> FunctionRef {
        let size = std::mem::size_of::<GCObject<ObjFunction>>()
            + data.chunk.code.len() * std::mem::size_of::<crate::common::opcode::OpCode>()
            + data.chunk.constants.len() * std::mem::size_of::<Value>();
        self.alloc_raw(data, ObjKind::Function, size)
    }

    pub fn alloc_native(&mut self, function: NativeFn, name: &'static str) -> NativeRef {
        let data = ObjNative { function, name };
        let size = std::mem::size_of::<GCObject<ObjNative>>();
        self.alloc_raw(data, ObjKind::Native, size)
    }

    pub fn alloc_closure(&mut self, data: ObjClosure) -> ClosureRef {
        let size = std::mem::size_of::<GCObject<ObjClosure>>()
            + data.upvalues.len() * std::mem::size_of::<UpvalueRef>();
        self.alloc_raw(data, ObjKind::Closure, size)
    }

    pub fn alloc_upvalue(&mut self, data: ObjUpvalue) -> UpvalueRef {
        let size = std::mem::size_of::<GCObject<ObjUpvalue>>();
        self.alloc_raw(data, ObjKind::Upvalue, size)
    }

    pub fn alloc_class(&mut self, data: ObjClass) -> ClassRef {
        let size = std::mem::size_of::<GCObject<ObjClass>>();
        self.alloc_raw(data, ObjKind::Class, size)
    }

    pub fn alloc_instance(&mut self, data: ObjInstance) -> InstanceRef {
        let size = std::mem::size_of::<GCObject<ObjInstance>>();
        self.alloc_raw(data, ObjKind::Instance, size)
    }

    pub fn alloc_bound_method(&mut self, data: ObjBoundMethod) -> BoundMethodRef {
        let size = std::mem::size_of::<GCObject<ObjBoundMethod>>();
        self.alloc_raw(data, ObjKind::BoundMethod, size)
    }

    fn alloc_raw<T>(&mut self, data: T, kind: ObjKind, size: usize) -> *mut GCObject<T> {
        let obj = GCObject { marked: false, kind, next: self.objects, size, data };
        let ptr = Box::into_raw(Box::new(obj));
        self.objects = ptr as *mut GCObject<HeaderOnly>;
        self.bytes_allocated += size;
        if self.bytes_allocated > self.max_allocated {
            self.max_allocated = self.bytes_allocated;
        }
        ptr
    }

    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    pub fn after_collect(&mut self) {
        self.next_gc = self.bytes_allocated.max(1) * 2;
    }

    /// Recursively blackens `value`'s outgoing references. Idempotent: an
    /// already-marked object is returned on without descending again, which
    /// is what keeps cyclic graphs (instance -> class -> closure ->
    /// upvalue -> instance) from looping forever.
    pub fn mark_value(&mut self, value: Value) {
        unsafe {
            match value {
                Value::Str(ptr) => self.mark_header(ptr as *mut GCObject<HeaderOnly>),
                Value::Function(ptr) => {
                    if self.mark_header(ptr as *mut GCObject<HeaderOnly>) {
                        let func = &(*ptr).data;
                        if let Some(name) = func.name {
                            self.mark_value(Value::Str(name));
                        }
                        let constants = func.chunk.constants.clone();
                        for c in constants {
                            self.mark_value(c);
                        }
                    }
                }
                Value::Native(ptr) => {
                    self.mark_header(ptr as *mut GCObject<HeaderOnly>);
                }
                Value::Closure(ptr) => {
                    if self.mark_header(ptr as *mut GCObject<HeaderOnly>) {
                        let function = (*ptr).data.function;
                        let upvalues = (*ptr).data.upvalues.clone();
                        self.mark_value(Value::Function(function));
                        for uv in upvalues {
                            self.mark_upvalue(uv);
                        }
                    }
                }
                Value::Class(ptr) => {
                    if self.mark_header(ptr as *mut GCObject<HeaderOnly>) {
                        let name = (*ptr).data.name;
                        let methods: Vec<ClosureRef> = (*ptr).data.methods.values().copied().collect();
                        self.mark_value(Value::Str(name));
                        for m in methods {
                            self.mark_value(Value::Closure(m));
                        }
                    }
                }
                Value::Instance(ptr) => {
                    if self.mark_header(ptr as *mut GCObject<HeaderOnly>) {
                        let class = (*ptr).data.class;
                        let fields: Vec<Value> = (*ptr).data.fields.values().copied().collect();
                        let keys: Vec<StrRef> = (*ptr).data.fields.keys().copied().collect();
                        self.mark_value(Value::Class(class));
                        for k in keys {
                            self.mark_value(Value::Str(k));
                        }
                        for v in fields {
                            self.mark_value(v);
                        }
                    }
                }
                Value::BoundMethod(ptr) => {
                    if self.mark_header(ptr as *mut GCObject<HeaderOnly>) {
                        let receiver = (*ptr).data.receiver;
                        let method = (*ptr).data.method;
                        self.mark_value(receiver);
                        self.mark_value(Value::Closure(method));
                    }
                }
                Value::Nil | Value::Bool(_) | Value::Number(_) => {}
            }
        }
    }

    pub fn mark_upvalue(&mut self, ptr: UpvalueRef) {
        unsafe {
            if self.mark_header(ptr as *mut GCObject<HeaderOnly>) {
                let closed = (*ptr).data.closed;
                self.mark_value(closed);
            }
        }
    }

    /// Returns true the first time an object is marked (i.e. "should we
    /// also blacken its children now").
    unsafe fn mark_header(&mut self, ptr: *mut GCObject<HeaderOnly>) -> bool {
        unsafe {
            if ptr.is_null() || (*ptr).marked {
                return false;
            }
            (*ptr).marked = true;
            true
        }
    }

    /// Unlinks and frees every unmarked object, clears the mark bit on
    /// survivors, and purges dead interned strings so the table never
    /// holds a dangling key.
    pub fn sweep(&mut self) -> (usize, usize) {
        let mut prev: *mut GCObject<HeaderOnly> = std::ptr::null_mut();
        let mut curr = self.objects;
        let mut swept_count = 0;
        let mut swept_bytes = 0;

        unsafe {
            while !curr.is_null() {
                if (*curr).marked {
                    (*curr).marked = false;
                    prev = curr;
                    curr = (*curr).next;
                    continue;
                }

                let next = (*curr).next;
                if prev.is_null() {
                    self.objects = next;
                } else {
                    (*prev).next = next;
                }

                let kind = (*curr).kind;
                let size = (*curr).size;
                swept_count += 1;
                swept_bytes += size;
                self.bytes_allocated = self.bytes_allocated.saturating_sub(size);

                match kind {
                    ObjKind::String => {
                        let p = curr as *mut GCObject<ObjString>;
                        self.strings.remove(&(*p).data.chars);
                        drop(Box::from_raw(p));
                    }
                    ObjKind::Function => drop(Box::from_raw(curr as *mut GCObject<ObjFunction>)),
                    ObjKind::Native => drop(Box::from_raw(curr as *mut GCObject<ObjNative>)),
                    ObjKind::Closure => drop(Box::from_raw(curr as *mut GCObject<ObjClosure>)),
                    ObjKind::Upvalue => drop(Box::from_raw(curr as *mut GCObject<ObjUpvalue>)),
                    ObjKind::Class => drop(Box::from_raw(curr as *mut GCObject<ObjClass>)),
                    ObjKind::Instance => drop(Box::from_raw(curr as *mut GCObject<ObjInstance>)),
                    ObjKind::BoundMethod => {
                        drop(Box::from_raw(curr as *mut GCObject<ObjBoundMethod>))
                    }
                }

                curr = next;
            }
        }

        (swept_count, swept_bytes)
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        // Tear down every remaining object unconditionally; mirrors the
        // teacher's `freeVM`-equivalent cleanup at process exit.
        let mut curr = self.objects;
        unsafe {
            while !curr.is_null() {
                let next = (*curr).next;
                match (*curr).kind {
                    ObjKind::String => drop(Box::from_raw(curr as *mut GCObject<ObjString>)),
                    ObjKind::Function => drop(Box::from_raw(curr as *mut GCObject<ObjFunction>)),
                    ObjKind::Native => drop(Box::from_raw(curr as *mut GCObject<ObjNative>)),
                    ObjKind::Closure => drop(Box::from_raw(curr as *mut GCObject<ObjClosure>)),
                    ObjKind::Upvalue => drop(Box::from_raw(curr as *mut GCObject<ObjUpvalue>)),
                    ObjKind::Class => drop(Box::from_raw(curr as *mut GCObject<ObjClass>)),
                    ObjKind::Instance => drop(Box::from_raw(curr as *mut GCObject<ObjInstance>)),
                    ObjKind::BoundMethod => {
                        drop(Box::from_raw(curr as *mut GCObject<ObjBoundMethod>))
                    }
                }
                curr = next;
            }
        }
    }
}

