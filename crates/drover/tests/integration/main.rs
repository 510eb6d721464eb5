/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Integration test suite.
//!
//! Each module drives the engine end to end against an in-memory store:
//! reservation and locking, semaphore admission, the task lifecycle, the
//! composite state machines, and the worker loop.


mod barrier;
mod chain;
mod periodic;
mod pipeline;
mod reservation;
mod semaphores;
