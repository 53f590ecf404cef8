use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::GpuError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CpuDescriptorHandle(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuDescriptorHandle(pub u64);

/// Placement of a shader-visible descriptor heap: both handle bases, the
/// per-slot stride reported by the device and the fixed slot count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorHeapInfo {
    pub cpu_start: CpuDescriptorHandle,
    pub gpu_start: GpuDescriptorHandle,
    pub increment: u32,
    pub capacity: u32,
}

impl DescriptorHeapInfo {
    pub fn cpu_at(&self, index: u32) -> CpuDescriptorHandle {
        CpuDescriptorHandle(self.cpu_start.0 + index as usize * self.increment as usize)
    }

    pub fn gpu_at(&self, index: u32) -> GpuDescriptorHandle {
        GpuDescriptorHandle(self.gpu_start.0 + index as u64 * self.increment as u64)
    }

    fn index_of_cpu(&self, handle: CpuDescriptorHandle) -> Option<u32> {
        let offset = handle.0.checked_sub(self.cpu_start.0)?;
        let stride = self.increment as usize;
        if stride == 0 || offset % stride != 0 {
            return None;
        }
        u32::try_from(offset / stride).ok().filter(|i| *i < self.capacity)
    }

    fn index_of_gpu(&self, handle: GpuDescriptorHandle) -> Option<u32> {
        let offset = handle.0.checked_sub(self.gpu_start.0)?;
        let stride = self.increment as u64;
        if stride == 0 || offset % stride != 0 {
            return None;
        }
        u32::try_from(offset / stride).ok().filter(|i| *i < self.capacity)
    }
}

/// Free-list allocator over a fixed-capacity descriptor heap.
///
/// Not synchronized; share it through [`SharedDescriptorHeap`].
pub struct DescriptorHeapAllocator {
    info: DescriptorHeapInfo,
    free_indices: Vec<u32>,
    in_use: Vec<bool>,
}

impl DescriptorHeapAllocator {
    pub fn new(info: DescriptorHeapInfo) -> Self {
        // Popped from the back, so slot 0 is handed out first.
        let free_indices = (0..info.capacity).rev().collect();
        Self {
            info,
            free_indices,
            in_use: vec![false; info.capacity as usize],
        }
    }

    pub fn info(&self) -> &DescriptorHeapInfo {
        &self.info
    }

    pub fn capacity(&self) -> u32 {
        self.info.capacity
    }

    pub fn available(&self) -> usize {
        self.free_indices.len()
    }

    pub fn alloc(&mut self) -> Result<(CpuDescriptorHandle, GpuDescriptorHandle), GpuError> {
        let index = self
            .free_indices
            .pop()
            .ok_or(GpuError::DescriptorHeapExhausted {
                capacity: self.info.capacity,
            })?;
        self.in_use[index as usize] = true;
        Ok((self.info.cpu_at(index), self.info.gpu_at(index)))
    }

    pub fn free(
        &mut self,
        cpu: CpuDescriptorHandle,
        gpu: GpuDescriptorHandle,
    ) -> Result<(), GpuError> {
        let cpu_index = self
            .info
            .index_of_cpu(cpu)
            .ok_or(GpuError::DescriptorOutOfRange)?;
        let gpu_index = self
            .info
            .index_of_gpu(gpu)
            .ok_or(GpuError::DescriptorOutOfRange)?;
        if cpu_index != gpu_index {
            return Err(GpuError::DescriptorMismatch {
                cpu_index,
                gpu_index,
            });
        }
        let used = &mut self.in_use[cpu_index as usize];
        if !*used {
            return Err(GpuError::DescriptorDoubleFree { index: cpu_index });
        }
        *used = false;
        self.free_indices.push(cpu_index);
        Ok(())
    }
}

/// The render thread's allocator behind the lock taken at every
/// allocate/free call site.
#[derive(Clone)]
pub struct SharedDescriptorHeap(Arc<Mutex<DescriptorHeapAllocator>>);

impl SharedDescriptorHeap {
    pub fn new(info: DescriptorHeapInfo) -> Self {
        Self(Arc::new(Mutex::new(DescriptorHeapAllocator::new(info))))
    }

    pub fn info(&self) -> DescriptorHeapInfo {
        *self.0.lock().info()
    }

    pub fn available(&self) -> usize {
        self.0.lock().available()
    }

    pub fn alloc_slot(&self) -> Result<DescriptorSlot, GpuError> {
        let (cpu, gpu) = self.0.lock().alloc()?;
        Ok(DescriptorSlot {
            cpu,
            gpu,
            heap: self.clone(),
        })
    }
}

/// A move-only claim on one heap slot. Dropping it returns the slot.
pub struct DescriptorSlot {
    cpu: CpuDescriptorHandle,
    gpu: GpuDescriptorHandle,
    heap: SharedDescriptorHeap,
}

impl DescriptorSlot {
    pub fn cpu(&self) -> CpuDescriptorHandle {
        self.cpu
    }

    pub fn gpu(&self) -> GpuDescriptorHandle {
        self.gpu
    }
}

impl fmt::Debug for DescriptorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorSlot")
            .field("cpu", &self.cpu)
            .field("gpu", &self.gpu)
            .finish()
    }
}

impl Drop for DescriptorSlot {
    fn drop(&mut self) {
        if let Err(e) = self.heap.0.lock().free(self.cpu, self.gpu) {
            log::error!("Failed to return descriptor slot: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn heap_info(capacity: u32) -> DescriptorHeapInfo {
        DescriptorHeapInfo {
            cpu_start: CpuDescriptorHandle(0x1000),
            gpu_start: GpuDescriptorHandle(0x8000_0000),
            increment: 32,
            capacity,
        }
    }

    #[test]
    fn first_allocation_is_slot_zero() {
        let mut alloc = DescriptorHeapAllocator::new(heap_info(4));
        let (cpu, gpu) = alloc.alloc().unwrap();
        assert_eq!(cpu, CpuDescriptorHandle(0x1000));
        assert_eq!(gpu, GpuDescriptorHandle(0x8000_0000));
        let (cpu, gpu) = alloc.alloc().unwrap();
        assert_eq!(cpu, CpuDescriptorHandle(0x1020));
        assert_eq!(gpu, GpuDescriptorHandle(0x8000_0020));
    }

    #[test]
    fn held_slots_never_collide() {
        let mut alloc = DescriptorHeapAllocator::new(heap_info(16));
        let mut held = Vec::new();
        // Interleave allocs and frees without ever exceeding capacity.
        for round in 0..64u32 {
            if round % 3 == 2 && !held.is_empty() {
                let (cpu, gpu) = held.remove((round as usize * 7) % held.len());
                alloc.free(cpu, gpu).unwrap();
            } else if held.len() < 16 {
                held.push(alloc.alloc().unwrap());
            }
            let unique: HashSet<_> = held.iter().copied().collect();
            assert_eq!(unique.len(), held.len());
        }
        assert_eq!(alloc.available(), 16 - held.len());
    }

    #[test]
    fn free_then_alloc_may_reuse_the_index() {
        let mut alloc = DescriptorHeapAllocator::new(heap_info(4));
        let _a = alloc.alloc().unwrap();
        let b = alloc.alloc().unwrap();
        alloc.free(b.0, b.1).unwrap();
        assert_eq!(alloc.alloc().unwrap(), b);
    }

    #[test]
    fn full_heap_fails_deterministically() {
        let mut alloc = DescriptorHeapAllocator::new(heap_info(2));
        alloc.alloc().unwrap();
        alloc.alloc().unwrap();
        for _ in 0..3 {
            assert!(matches!(
                alloc.alloc(),
                Err(GpuError::DescriptorHeapExhausted { capacity: 2 })
            ));
        }
        assert_eq!(alloc.available(), 0);
    }

    #[test]
    fn mismatched_handles_are_rejected() {
        let mut alloc = DescriptorHeapAllocator::new(heap_info(4));
        let a = alloc.alloc().unwrap();
        let b = alloc.alloc().unwrap();
        let err = alloc.free(a.0, b.1).unwrap_err();
        assert!(matches!(
            err,
            GpuError::DescriptorMismatch {
                cpu_index: 0,
                gpu_index: 1
            }
        ));
        // Nothing was returned to the free list.
        assert_eq!(alloc.available(), 2);
    }

    #[test]
    fn double_free_and_foreign_handles_are_rejected() {
        let mut alloc = DescriptorHeapAllocator::new(heap_info(4));
        let (cpu, gpu) = alloc.alloc().unwrap();
        alloc.free(cpu, gpu).unwrap();
        assert!(matches!(
            alloc.free(cpu, gpu),
            Err(GpuError::DescriptorDoubleFree { index: 0 })
        ));
        assert!(matches!(
            alloc.free(CpuDescriptorHandle(0x1010), GpuDescriptorHandle(0x8000_0010)),
            Err(GpuError::DescriptorOutOfRange)
        ));
        assert!(matches!(
            alloc.free(CpuDescriptorHandle(0x0800), gpu),
            Err(GpuError::DescriptorOutOfRange)
        ));
        assert!(matches!(
            alloc.free(CpuDescriptorHandle(0x1000 + 4 * 32), GpuDescriptorHandle(0x8000_0000 + 4 * 32)),
            Err(GpuError::DescriptorOutOfRange)
        ));
        assert_eq!(alloc.available(), 4);
    }

    #[test]
    fn dropping_a_slot_returns_it_to_the_heap() {
        let heap = SharedDescriptorHeap::new(heap_info(3));
        let first = heap.alloc_slot().unwrap();
        let second = heap.alloc_slot().unwrap();
        assert_eq!(heap.available(), 1);
        let second_cpu = second.cpu();
        drop(second);
        assert_eq!(heap.available(), 2);
        let again = heap.alloc_slot().unwrap();
        assert_eq!(again.cpu(), second_cpu);
        assert_ne!(again.cpu(), first.cpu());
    }
}
