// SPDX-License-Identifier: MPL-2.0

//! Semaphores for the system. Only System V semaphore sets are provided.

pub mod system_v;
