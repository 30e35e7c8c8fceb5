//! Interpreter memory.
//!
//! Memory is a set of objects (one per `alloca` and per global), each a
//! vector of cells. A cell holds one [`RtValue`] of any type, so pointer
//! arithmetic counts elements rather than bytes. Stack objects die when the
//! frame that allocated them returns; any later access is a fault.

use std::fmt;

use crate::{runtime::interp::RtValue, Error, Result};

/// An address: object plus cell offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    /// Object handle.
    pub object: usize,
    /// Cell index within the object; may be out of range until dereferenced.
    pub offset: i64,
}

impl Pointer {
    /// The pointer `delta` cells further.
    #[must_use]
    pub fn offset_by(self, delta: i64) -> Self {
        Self {
            offset: self.offset.wrapping_add(delta),
            ..self
        }
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj{}+{}", self.object, self.offset)
    }
}

#[derive(Debug)]
struct Object {
    cells: Vec<RtValue>,
    live: bool,
    writable: bool,
}

/// All objects of one interpreter run.
#[derive(Debug, Default)]
pub struct Memory {
    objects: Vec<Object>,
}

impl Memory {
    /// Creates an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `count` cells initialised to `init`.
    pub fn allocate(&mut self, count: usize, init: RtValue, writable: bool) -> Pointer {
        self.objects.push(Object {
            cells: vec![init; count],
            live: true,
            writable,
        });
        Pointer {
            object: self.objects.len() - 1,
            offset: 0,
        }
    }

    /// Ends the lifetime of an object.
    pub fn release(&mut self, object: usize) {
        if let Some(obj) = self.objects.get_mut(object) {
            obj.live = false;
            obj.cells = Vec::new();
        }
    }

    /// Number of objects still alive.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.objects.iter().filter(|o| o.live).count()
    }

    fn cell(&self, ptr: Pointer) -> Result<(&Object, usize)> {
        let obj = self
            .objects
            .get(ptr.object)
            .filter(|o| o.live)
            .ok_or_else(|| Error::Runtime(format!("access to dead object at {ptr}")))?;
        let index = usize::try_from(ptr.offset)
            .ok()
            .filter(|&i| i < obj.cells.len())
            .ok_or_else(|| Error::Runtime(format!("out-of-bounds access at {ptr}")))?;
        Ok((obj, index))
    }

    /// Reads the cell at `ptr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] for dead objects and out-of-bounds offsets.
    pub fn load(&self, ptr: Pointer) -> Result<RtValue> {
        let (obj, index) = self.cell(ptr)?;
        Ok(obj.cells[index].clone())
    }

    /// Writes the cell at `ptr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] for dead or read-only objects and
    /// out-of-bounds offsets.
    pub fn store(&mut self, ptr: Pointer, value: RtValue) -> Result<()> {
        let (obj, index) = self.cell(ptr)?;
        if !obj.writable {
            return Err(Error::Runtime(format!("store to constant at {ptr}")));
        }
        if let Some(cell) = self
            .objects
            .get_mut(ptr.object)
            .and_then(|o| o.cells.get_mut(index))
        {
            *cell = value;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_store() -> Result<()> {
        let mut memory = Memory::new();
        let p = memory.allocate(4, RtValue::Int(0), true);
        memory.store(p.offset_by(3), RtValue::Int(9))?;
        assert_eq!(memory.load(p.offset_by(3))?, RtValue::Int(9));
        assert!(memory.load(p.offset_by(4)).is_err());
        assert!(memory.load(p.offset_by(-1)).is_err());
        Ok(())
    }

    #[test]
    fn test_released_and_constant_objects() {
        let mut memory = Memory::new();
        let c = memory.allocate(1, RtValue::Int(5), false);
        assert!(memory.store(c, RtValue::Int(6)).is_err());
        let s = memory.allocate(1, RtValue::Int(0), true);
        memory.release(s.object);
        assert!(memory.load(s).is_err());
        assert_eq!(memory.live_objects(), 1);
    }
}
